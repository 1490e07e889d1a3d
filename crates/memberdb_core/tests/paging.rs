use memberdb_core::query::executor::{self, QueryDescriptor, QueryOptions};
use memberdb_core::query::template::TemplateQuery;
use memberdb_core::{
    in_unit_of_work, open_db_in_memory, CrudRepository, Member, MemberRepository, PageRequest,
    PersistenceContext, QueryParams, RepoError, Sort, StoreConfig, Team, TeamRepository,
    UnitOfWork,
};
use rusqlite::Connection;

fn seeded(members: &MemberRepository) -> (Connection, PersistenceContext) {
    let mut conn = open_db_in_memory().unwrap();
    let context = PersistenceContext::new(StoreConfig::default());
    let teams = TeamRepository::new().unwrap();
    in_unit_of_work(&mut conn, &context, |uow| {
        let team_a = teams.save(uow, Team::new("teamA"))?;
        members.save(uow, Member::with_team("member1", 10, &team_a))?;
        members.save(uow, Member::with_team("member2", 20, &team_a))?;
        members.save(uow, Member::with_age("member3", 30))?;
        Ok(())
    })
    .unwrap();
    (conn, context)
}

#[test]
fn find_all_paged_splits_three_rows_into_two_pages() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let request = PageRequest::of(0, 2).unwrap().with_sort(Sort::desc("age"));
    let first = members.find_all_paged(&mut uow, &request).unwrap();
    assert_eq!(first.number(), 0);
    assert_eq!(first.size(), 2);
    assert_eq!(first.number_of_elements(), 2);
    assert_eq!(first.total_elements(), 3);
    assert_eq!(first.total_pages(), 2);
    assert!(first.is_first());
    assert!(first.has_next());
    assert_eq!(
        first.content().iter().map(|member| member.age).collect::<Vec<_>>(),
        vec![30, 20]
    );
    assert_eq!(first.content()[1].loaded_team().unwrap().name, "teamA");

    let second = members.find_all_paged(&mut uow, &request.next()).unwrap();
    assert_eq!(second.number_of_elements(), 1);
    assert_eq!(second.content()[0].age, 10);
    assert!(second.is_last());
    assert!(second.has_previous());
    assert!(!second.has_next());
}

#[test]
fn page_past_the_end_is_empty_but_keeps_the_total() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let page = members
        .find_all_paged(&mut uow, &PageRequest::of(5, 2).unwrap())
        .unwrap();
    assert!(page.content().is_empty());
    assert_eq!(page.total_elements(), 3);
    assert!(!page.has_next());
}

#[test]
fn zero_page_size_is_rejected() {
    assert!(matches!(
        PageRequest::of(0, 0),
        Err(RepoError::InvalidArgument(_))
    ));
}

#[test]
fn sorting_by_unknown_attribute_is_rejected() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let result = members.find_all_sorted(&mut uow, &Sort::asc("username"));
    assert!(matches!(result, Err(RepoError::UnknownField { .. })));
}

#[test]
fn native_projection_pages_with_its_count_query() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let request = PageRequest::of(0, 2).unwrap().with_sort(Sort::asc("name"));
    let page = members.find_by_native_projection(&mut uow, &request).unwrap();
    assert_eq!(page.total_elements(), 3);
    assert_eq!(page.content()[0].name(), "member1");
    assert_eq!(page.content()[0].team_name(), Some("teamA"));

    let last = members
        .find_by_native_projection(&mut uow, &request.next())
        .unwrap();
    assert_eq!(last.content()[0].name(), "member3");
    assert_eq!(last.content()[0].team_name(), None);
}

#[test]
fn template_paging_maps_entity_sort_keys_to_columns() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let query = TemplateQuery::parse("SELECT m.* FROM members m WHERE m.age >= :age")
        .unwrap()
        .with_count_query("SELECT COUNT(*) FROM members WHERE age >= :age")
        .unwrap();
    let params = QueryParams::new().bind("age", 20);
    let request = PageRequest::of(0, 1).unwrap().with_sort(Sort::desc("id"));
    let page = executor::find_page::<Member>(
        &mut uow,
        &QueryDescriptor::Template {
            query: &query,
            params: &params,
        },
        &request,
        QueryOptions::default(),
    )
    .unwrap();
    assert_eq!(page.total_elements(), 2);
    assert_eq!(page.content()[0].name, "member3");
}

#[test]
fn pages_serialize_with_their_metadata() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let request = PageRequest::of(0, 2).unwrap();
    let page = members.find_by_native_projection(&mut uow, &request).unwrap();
    let json = serde_json::to_value(&page).unwrap();
    assert_eq!(json["content"].as_array().unwrap().len(), 2);
    assert_eq!(json["total_elements"], 3);
}
