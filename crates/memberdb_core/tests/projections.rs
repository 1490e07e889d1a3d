use memberdb_core::projection::{
    ClosedProjection, MemberDto, MemberProjection, MemberSummary, NameOnly, UsernameOnlyDto,
};
use memberdb_core::query::executor::{self, QueryDescriptor};
use memberdb_core::query::template::{RawQuery, TemplateQuery};
use memberdb_core::{
    in_unit_of_work, open_db_in_memory, CrudRepository, Member, MemberRepository,
    PersistenceContext, QueryParams, RepoError, StoreConfig, Team, TeamRepository, UnitOfWork,
};
use rusqlite::Connection;

fn seeded(members: &MemberRepository) -> (Connection, PersistenceContext) {
    let mut conn = open_db_in_memory().unwrap();
    let context = PersistenceContext::new(StoreConfig::default());
    let teams = TeamRepository::new().unwrap();
    in_unit_of_work(&mut conn, &context, |uow| {
        let team_a = teams.save(uow, Team::new("teamA"))?;
        members.save(uow, Member::with_team("m1", 0, &team_a))?;
        members.save(uow, Member::with_team("m2", 7, &team_a))?;
        members.save(uow, Member::with_age("solo", 3))?;
        Ok(())
    })
    .unwrap();
    (conn, context)
}

#[test]
fn derived_query_projects_name_only() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let views = members
        .find_projection_by_name::<NameOnly>(&mut uow, "m1")
        .unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].name(), "m1");
    assert_eq!(uow.managed_count(), 0);

    let dtos = members
        .find_projection_by_name::<UsernameOnlyDto>(&mut uow, "m2")
        .unwrap();
    assert_eq!(dtos[0].username, "m2");
}

#[test]
fn nested_projection_reads_through_the_team() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let closed = members
        .find_projection_by_name::<ClosedProjection>(&mut uow, "m1")
        .unwrap();
    assert_eq!(closed[0].name(), "m1");
    assert_eq!(closed[0].team().unwrap().name(), "teamA");

    let solo = members
        .find_projection_by_name::<ClosedProjection>(&mut uow, "solo")
        .unwrap();
    assert!(solo[0].team().is_none());
}

#[test]
fn member_dto_projection_allows_members_without_team() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let with_team = members
        .find_projection_by_name::<MemberDto>(&mut uow, "m1")
        .unwrap();
    assert_eq!(with_team[0].team_name.as_deref(), Some("teamA"));

    let solo = members
        .find_projection_by_name::<MemberDto>(&mut uow, "solo")
        .unwrap();
    assert_eq!(solo.len(), 1);
    assert_eq!(solo[0].name, "solo");
    assert_eq!(solo[0].team_name, None);
    assert_eq!(
        serde_json::to_value(&solo[0]).unwrap()["team_name"],
        serde_json::Value::Null
    );
}

#[test]
fn computed_summary_label() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let summary = members
        .find_projection_by_name::<MemberSummary>(&mut uow, "m1")
        .unwrap();
    assert_eq!(summary[0].label(), "m1 0 @teamA");

    let summary = members
        .find_projection_by_name::<MemberSummary>(&mut uow, "solo")
        .unwrap();
    assert_eq!(summary[0].label(), "solo 3");
}

#[test]
fn template_projection_exposes_only_declared_fields() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let query = TemplateQuery::parse(
        "SELECT m.*, t.name AS team_name FROM members m JOIN team t ON t.team_id = m.team_id \
         WHERE m.name = :name",
    )
    .unwrap();
    let params = QueryParams::new().bind("name", "m2");
    let dtos = executor::find_projections::<Member, MemberDto>(
        &mut uow,
        &QueryDescriptor::Template {
            query: &query,
            params: &params,
        },
    );
    // `m.*` has no `id` column; only declared aliases are visible.
    assert!(matches!(dtos, Err(RepoError::InvalidData(_))));

    let dtos = members.find_member_dto(&mut uow).unwrap();
    let json = serde_json::to_value(&dtos[1]).unwrap();
    let keys: Vec<&str> = json
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["id", "name", "team_name"]);
}

#[test]
fn raw_projection_maps_aliases() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let query = RawQuery::new(
        "SELECT m.member_id AS id, m.name AS name, m.age, t.name AS team_name \
         FROM members m LEFT JOIN team t ON t.team_id = m.team_id WHERE m.age > ? ORDER BY m.member_id",
    )
    .unwrap();
    let args = [rusqlite::types::Value::Integer(2)];
    let projected = executor::find_projections::<Member, MemberProjection>(
        &mut uow,
        &QueryDescriptor::Raw {
            query: &query,
            args: &args,
        },
    )
    .unwrap();
    assert_eq!(
        projected.iter().map(MemberProjection::name).collect::<Vec<_>>(),
        vec!["m2", "solo"]
    );
    assert_eq!(projected[0].team_name(), Some("teamA"));
    assert_eq!(projected[1].team_name(), None);
}
