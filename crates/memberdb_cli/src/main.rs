//! CLI smoke entry point.
//!
//! # Responsibility
//! - Seed a store with two teams and four members, then print the results
//!   of the main query families.
//! - Keep output deterministic for quick local sanity checks.
//!
//! Usage: `memberdb_cli [DB_PATH]`. Without a path the store is in memory.
//! Set `MEMBERDB_LOG_DIR` to an absolute directory to enable file logs.

use log::info;
use memberdb_core::projection::{MemberSummary, NameOnly};
use memberdb_core::{
    core_version, in_unit_of_work, init_logging, open_db, open_db_in_memory, CrudRepository,
    LoggingConfig, Member, MemberRepository, MemberRepositoryCustom, PageRequest,
    PersistenceContext, Sort, StoreConfig, Team, TeamRepository,
};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    if let Ok(log_dir) = std::env::var("MEMBERDB_LOG_DIR") {
        init_logging(&LoggingConfig::new(
            memberdb_core::default_log_level(),
            log_dir,
        ))?;
    }

    let mut conn = match std::env::args().nth(1) {
        Some(path) => open_db(path)?,
        None => open_db_in_memory()?,
    };
    let context = PersistenceContext::new(StoreConfig::default());
    let members = MemberRepository::new()?;
    let teams = TeamRepository::new()?;
    println!("memberdb_core version={}", core_version());

    in_unit_of_work(&mut conn, &context, |uow| {
        let team_a = teams.save(uow, Team::new("teamA"))?;
        let team_b = teams.save(uow, Team::new("teamB"))?;
        members.save(uow, Member::with_team("member1", 10, &team_a))?;
        members.save(uow, Member::with_team("member2", 20, &team_a))?;
        members.save(uow, Member::with_team("member3", 30, &team_b))?;
        members.save(uow, Member::with_age("member4", 40))?;
        Ok(())
    })?;
    info!("event=cli_seed module=cli status=ok");

    in_unit_of_work(&mut conn, &context, |uow| {
        for member in members.find_all(uow)? {
            let team = member.loaded_team().map_or("-", |team| team.name.as_str());
            println!("member name={} age={} team={team}", member.name, member.age);
        }

        let older = members.find_by_name_and_age_greater_than(uow, "member3", 15)?;
        println!("derived findByNameAndAgeGreaterThan count={}", older.len());

        println!("template findNameList names={:?}", members.find_name_list(uow)?);
        for dto in members.find_member_dto(uow)? {
            println!(
                "dto id={} name={} team={}",
                dto.id,
                dto.name,
                dto.team_name.as_deref().unwrap_or("-")
            );
        }

        let request = PageRequest::of(0, 2)?.with_sort(Sort::desc("age"));
        let page = members.find_all_paged(uow, &request)?;
        println!(
            "page number={} elements={} total={} pages={} has_next={}",
            page.number(),
            page.number_of_elements(),
            page.total_elements(),
            page.total_pages(),
            page.has_next()
        );

        for view in members.find_projection_by_name::<NameOnly>(uow, "member1")? {
            println!("projection NameOnly name={}", view.name());
        }
        for summary in members.find_projection_by_name::<MemberSummary>(uow, "member2")? {
            println!("projection MemberSummary label={}", summary.label());
        }

        let bumped = members.bulk_age_plus(uow, 20)?;
        println!("bulk_age_plus updated={bumped}");
        println!("custom findMemberCustom count={}", members.find_member_custom(uow)?.len());

        let locked = members.find_lock_by_name(uow, "member1")?;
        println!("locked name={} version={}", locked.name, locked.version);
        Ok(())
    })?;

    Ok(())
}
