use memberdb_core::{
    in_unit_of_work, open_db_in_memory, CrudRepository, Member, MemberRepository,
    MemberRepositoryCustom, PageRequest, PersistenceContext, QueryValue, RepoError, Sort,
    StoreConfig, UnitOfWork,
};
use rusqlite::Connection;

fn seeded(members: &MemberRepository) -> (Connection, PersistenceContext) {
    let mut conn = open_db_in_memory().unwrap();
    let context = PersistenceContext::new(StoreConfig::default());
    in_unit_of_work(&mut conn, &context, |uow| {
        members.save(uow, Member::with_age("AAA", 10))?;
        members.save(uow, Member::with_age("AAA", 20))?;
        members.save(uow, Member::with_age("BBB", 20))?;
        members.save(uow, Member::with_age("CCC", 30))?;
        Ok(())
    })
    .unwrap();
    (conn, context)
}

#[test]
fn find_by_name_and_age_greater_than() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let result = members
        .find_by_name_and_age_greater_than(&mut uow, "AAA", 15)
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].name, "AAA");
    assert_eq!(result[0].age, 20);
}

#[test]
fn find_by_name_returns_every_match_in_id_order() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let result = members.find_by_name(&mut uow, "AAA").unwrap();
    assert_eq!(
        result.iter().map(|member| member.age).collect::<Vec<_>>(),
        vec![10, 20]
    );
    assert!(members.find_by_name(&mut uow, "ZZZ").unwrap().is_empty());
}

#[test]
fn top3_limits_to_the_first_three_by_id() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let top = members.find_top3(&mut uow).unwrap();
    assert_eq!(
        top.iter().map(|member| member.name.as_str()).collect::<Vec<_>>(),
        vec!["AAA", "AAA", "BBB"]
    );
}

#[test]
fn find_by_age_pages_over_matches() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let request = PageRequest::of(0, 1)
        .unwrap()
        .with_sort(Sort::desc("name"));
    let page = members.find_by_age(&mut uow, 20, &request).unwrap();
    assert_eq!(page.total_elements(), 2);
    assert_eq!(page.total_pages(), 2);
    assert_eq!(page.content()[0].name, "BBB");
    assert!(page.has_next());

    let next = members.find_by_age(&mut uow, 20, &request.next()).unwrap();
    assert_eq!(next.content()[0].name, "AAA");
    assert!(next.is_last());
}

#[test]
fn read_only_results_are_never_flushed() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);

    in_unit_of_work(&mut conn, &context, |uow| {
        let member = members.find_read_only_by_name(uow, "CCC")?.unwrap();
        uow.get_mut::<Member>(member.id.unwrap()).unwrap().name = "changed".to_string();
        Ok(())
    })
    .unwrap();

    let mut uow = UnitOfWork::begin(&mut conn, &context);
    assert!(members.find_by_name(&mut uow, "changed").unwrap().is_empty());
    assert_eq!(members.find_by_name(&mut uow, "CCC").unwrap().len(), 1);
}

#[test]
fn read_only_single_lookup_rejects_duplicates() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    assert!(members.find_read_only_by_name(&mut uow, "ZZZ").unwrap().is_none());
    assert!(matches!(
        members.find_read_only_by_name(&mut uow, "AAA"),
        Err(RepoError::NonUniqueResult { count: 2, .. })
    ));
}

#[test]
fn queries_see_unflushed_changes() {
    let members = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let ccc = members.find_by_name(&mut uow, "CCC").unwrap().remove(0);
    uow.get_mut::<Member>(ccc.id.unwrap()).unwrap().name = "DDD".to_string();

    let renamed = members.find_by_name(&mut uow, "DDD").unwrap();
    assert_eq!(renamed, vec![ccc]);
}

#[test]
fn registered_derived_finders_are_resolved_at_build() {
    let members = MemberRepository::builder()
        .derived_query("findByAgeLessThanEqualOrderByNameDesc")
        .derived_query("findByNameIn")
        .build()
        .unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    let young = members
        .find_derived(
            &mut uow,
            "findByAgeLessThanEqualOrderByNameDesc",
            &[QueryValue::from(20)],
        )
        .unwrap();
    assert_eq!(
        young.iter().map(|member| member.name.as_str()).collect::<Vec<_>>(),
        vec!["BBB", "AAA", "AAA"]
    );

    let listed = members
        .find_derived(&mut uow, "findByNameIn", &[QueryValue::list(["BBB", "CCC"])])
        .unwrap();
    assert_eq!(listed.len(), 2);

    assert!(matches!(
        members.find_derived(&mut uow, "findByCity", &[QueryValue::from("Seoul")]),
        Err(RepoError::InvalidQuery { .. })
    ));
}

#[test]
fn unknown_field_fails_when_the_repository_is_built() {
    let err = MemberRepository::builder()
        .derived_query("findByUsername")
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::UnknownField { entity: "Member", ref field, .. } if field == "username"
    ));
}

#[test]
fn wrong_argument_count_is_a_binding_error() {
    let members = MemberRepository::builder()
        .derived_query("findByNameAndAge")
        .build()
        .unwrap();
    let (mut conn, context) = seeded(&members);
    let mut uow = UnitOfWork::begin(&mut conn, &context);

    assert!(matches!(
        members.find_derived(&mut uow, "findByNameAndAge", &[QueryValue::from("AAA")]),
        Err(RepoError::ParameterBinding { .. })
    ));
}

#[test]
fn custom_extension_is_reachable_through_the_repository() {
    struct OnlyFirst;

    impl MemberRepositoryCustom for OnlyFirst {
        fn find_member_custom(&self, uow: &mut UnitOfWork<'_>) -> memberdb_core::RepoResult<Vec<Member>> {
            let mut all = memberdb_core::SimpleRepository::<Member>::new().find_all(uow)?;
            all.truncate(1);
            Ok(all)
        }
    }

    let default_repo = MemberRepository::new().unwrap();
    let (mut conn, context) = seeded(&default_repo);
    let mut uow = UnitOfWork::begin(&mut conn, &context);
    assert_eq!(default_repo.find_member_custom(&mut uow).unwrap().len(), 4);

    let custom_repo = MemberRepository::builder().custom(OnlyFirst).build().unwrap();
    assert_eq!(custom_repo.find_member_custom(&mut uow).unwrap().len(), 1);
}
