use memberdb_core::session::RowKey;
use memberdb_core::{
    in_unit_of_work, open_db, CrudRepository, Member, MemberRepository, PersistenceContext,
    RepoError, RepoResult, StoreConfig, UnitOfWork,
};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

fn seed(path: &Path, context: &PersistenceContext) {
    let mut conn = open_db(path).unwrap();
    let members = MemberRepository::new().unwrap();
    in_unit_of_work(&mut conn, context, |uow| {
        members.save(uow, Member::with_age("member1", 10))?;
        members.save(uow, Member::with_age("twin", 1))?;
        members.save(uow, Member::with_age("twin", 2))?;
        Ok(())
    })
    .unwrap();
}

type BeforeLock = fn(&MemberRepository, &mut UnitOfWork<'_>) -> RepoResult<()>;

/// One unit of work holds the lock on `member1` while a second one, after
/// running `before_lock`, waits for it. Both increment the age.
fn contended_increment(before_lock: BeforeLock) -> Duration {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locking.db");
    let context = PersistenceContext::new(StoreConfig::default());
    seed(&path, &context);

    let (locked_tx, locked_rx) = mpsc::channel();
    let holder = {
        let path = path.clone();
        let context = context.clone();
        thread::spawn(move || {
            let mut conn = open_db(&path).unwrap();
            let members = MemberRepository::new().unwrap();
            in_unit_of_work(&mut conn, &context, |uow| {
                let member = members.find_lock_by_name(uow, "member1")?;
                locked_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(200));
                uow.get_mut::<Member>(member.id.unwrap()).unwrap().age += 1;
                Ok(())
            })
            .unwrap();
        })
    };

    locked_rx.recv().unwrap();
    let waiter = {
        let path = path.clone();
        let context = context.clone();
        thread::spawn(move || {
            let mut conn = open_db(&path).unwrap();
            let members = MemberRepository::new().unwrap();
            let started = Instant::now();
            in_unit_of_work(&mut conn, &context, |uow| {
                before_lock(&members, uow)?;
                let member = members.find_lock_by_name(uow, "member1")?;
                let waited = started.elapsed();
                assert_eq!(member.age, 11, "lock holder's write must be visible");
                assert_eq!(member.version, 1);
                uow.get_mut::<Member>(member.id.unwrap()).unwrap().age += 1;
                Ok(waited)
            })
            .unwrap()
        })
    };

    holder.join().unwrap();
    let waited = waiter.join().unwrap();

    let mut conn = open_db(&path).unwrap();
    let members = MemberRepository::new().unwrap();
    let member = in_unit_of_work(&mut conn, &context, |uow| {
        Ok(members.find_by_name(uow, "member1")?.remove(0))
    })
    .unwrap();
    assert_eq!(member.age, 12);
    assert!(!context
        .locks()
        .is_locked(RowKey::new("members", member.id.unwrap())));
    waited
}

#[test]
fn exclusive_lock_serializes_read_modify_write() {
    let waited = contended_increment(|_, _| Ok(()));
    assert!(waited >= Duration::from_millis(100), "waited only {waited:?}");
}

#[test]
fn lock_taken_after_a_read_sees_the_holders_commit() {
    let waited = contended_increment(|members, uow| {
        assert_eq!(members.find_by_name(uow, "twin")?.len(), 2);
        assert!(uow.is_active());
        Ok(())
    });
    assert!(waited >= Duration::from_millis(100), "waited only {waited:?}");
}

#[test]
fn lock_taken_after_a_write_keeps_the_write() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("write_then_lock.db");
    let context = PersistenceContext::new(StoreConfig::default());
    seed(&path, &context);

    let mut conn = open_db(&path).unwrap();
    let members = MemberRepository::new().unwrap();
    let newcomer = in_unit_of_work(&mut conn, &context, |uow| {
        let newcomer = members.save(uow, Member::with_age("newcomer", 30))?;
        let locked = members.find_lock_by_name(uow, "member1")?;
        uow.get_mut::<Member>(locked.id.unwrap()).unwrap().age = 20;
        Ok(newcomer)
    })
    .unwrap();

    let (newcomer, member1) = in_unit_of_work(&mut conn, &context, |uow| {
        let newcomer = members.get_by_id(uow, newcomer.id.unwrap())?;
        let member1 = members.find_by_name(uow, "member1")?.remove(0);
        Ok((newcomer, member1))
    })
    .unwrap();
    assert_eq!(newcomer.age, 30);
    assert_eq!(member1.age, 20);
}

#[test]
fn lock_wait_times_out_with_a_concurrency_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timeout.db");
    let context = PersistenceContext::new(
        StoreConfig::default().with_lock_timeout(Duration::from_millis(100)),
    );
    seed(&path, &context);

    let mut conn = open_db(&path).unwrap();
    let members = MemberRepository::new().unwrap();
    let mut holder = UnitOfWork::begin(&mut conn, &context);
    members.find_lock_by_name(&mut holder, "member1").unwrap();

    let waiter = {
        let path = path.clone();
        let context = context.clone();
        thread::spawn(move || {
            let mut conn = open_db(&path).unwrap();
            let members = MemberRepository::new().unwrap();
            let mut uow = UnitOfWork::begin(&mut conn, &context);
            members.find_lock_by_name(&mut uow, "member1").map(drop)
        })
    };
    let result = waiter.join().unwrap();
    assert!(matches!(
        result,
        Err(RepoError::ConcurrencyConflict { entity: "Member", .. })
    ));

    holder.commit().unwrap();
}

#[test]
fn locking_the_same_row_twice_in_one_unit_of_work_is_reentrant() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reentrant.db");
    let context = PersistenceContext::new(StoreConfig::default());
    seed(&path, &context);

    let mut conn = open_db(&path).unwrap();
    let members = MemberRepository::new().unwrap();
    in_unit_of_work(&mut conn, &context, |uow| {
        let first = members.find_lock_by_name(uow, "member1")?;
        let second = members.find_lock_by_name(uow, "member1")?;
        assert_eq!(first, second);
        Ok(())
    })
    .unwrap();
}

#[test]
fn lock_lookup_needs_exactly_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("unique.db");
    let context = PersistenceContext::new(StoreConfig::default());
    seed(&path, &context);

    let mut conn = open_db(&path).unwrap();
    let members = MemberRepository::new().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn, &context);
    assert!(matches!(
        members.find_lock_by_name(&mut uow, "nobody"),
        Err(RepoError::NotFound { .. })
    ));
    assert!(matches!(
        members.find_lock_by_name(&mut uow, "twin"),
        Err(RepoError::NonUniqueResult { count: 2, .. })
    ));
}
