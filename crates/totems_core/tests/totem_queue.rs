use totems_core::db::open_db_in_memory;
use totems_core::{
    Eviction, JoinOutcome, ReleaseOutcome, RepoError, RequesterId, SqliteTotemRepository,
    TotemName, TotemRepository, TotemService, TotemServiceError,
};

fn name(raw: &str) -> TotemName {
    TotemName::parse(raw).unwrap()
}

fn id(raw: &str) -> RequesterId {
    RequesterId::new(raw)
}

/// Requester ids in rank order, asserting ranks are dense from 1.
fn line(repo: &SqliteTotemRepository<'_>, totem: &TotemName) -> Vec<String> {
    let entries = repo.snapshot(totem).unwrap();
    for (index, entry) in entries.iter().enumerate() {
        assert_eq!(entry.rank as usize, index + 1);
    }
    entries
        .into_iter()
        .map(|entry| entry.requester_id.to_string())
        .collect()
}

#[test]
fn first_joiner_on_empty_queue_becomes_holder() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();

    assert_eq!(repo.join(&foo, &id("u1"), 10).unwrap(), JoinOutcome::Holder);
    assert_eq!(repo.holder(&foo).unwrap(), Some(id("u1")));
    assert_eq!(
        repo.join(&foo, &id("u2"), 20).unwrap(),
        JoinOutcome::Waiting { rank: 2 }
    );
    assert_eq!(repo.holder(&foo).unwrap(), Some(id("u1")));
}

#[test]
fn joining_twice_reports_already_queued_without_changes() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();

    repo.join(&foo, &id("u1"), 10).unwrap();
    let before = repo.snapshot(&foo).unwrap();
    assert_eq!(
        repo.join(&foo, &id("u1"), 99).unwrap(),
        JoinOutcome::AlreadyQueued
    );
    assert_eq!(repo.snapshot(&foo).unwrap(), before);
}

#[test]
fn holder_release_promotes_next_and_refreshes_its_timestamp() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();
    repo.join(&foo, &id("u1"), 10).unwrap();
    repo.join(&foo, &id("u2"), 20).unwrap();
    repo.join(&foo, &id("u3"), 30).unwrap();

    let outcome = repo.release(&foo, &id("u1"), 500).unwrap();
    assert_eq!(
        outcome,
        ReleaseOutcome::Released {
            new_holder: Some(id("u2"))
        }
    );

    let entries = repo.snapshot(&foo).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].requester_id, id("u2"));
    assert_eq!(entries[0].rank, 1);
    assert_eq!(entries[0].joined_at, 500);
    // Waiters keep their own join time.
    assert_eq!(entries[1].requester_id, id("u3"));
    assert_eq!(entries[1].rank, 2);
    assert_eq!(entries[1].joined_at, 30);
}

#[test]
fn waiter_release_keeps_holder_untouched() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();
    repo.join(&foo, &id("u1"), 10).unwrap();
    repo.join(&foo, &id("u2"), 20).unwrap();
    repo.join(&foo, &id("u3"), 30).unwrap();

    assert_eq!(
        repo.release(&foo, &id("u2"), 500).unwrap(),
        ReleaseOutcome::Released { new_holder: None }
    );
    let entries = repo.snapshot(&foo).unwrap();
    assert_eq!(entries[0].requester_id, id("u1"));
    assert_eq!(entries[0].joined_at, 10);
    assert_eq!(line(&repo, &foo), vec!["u1", "u3"]);
}

#[test]
fn last_holder_release_empties_queue_without_new_holder() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();
    repo.join(&foo, &id("u1"), 10).unwrap();

    assert_eq!(
        repo.release(&foo, &id("u1"), 20).unwrap(),
        ReleaseOutcome::Released { new_holder: None }
    );
    assert_eq!(repo.holder(&foo).unwrap(), None);
}

#[test]
fn release_when_not_queued_is_a_no_op() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();
    repo.join(&foo, &id("u1"), 10).unwrap();

    assert_eq!(
        repo.release(&foo, &id("u9"), 20).unwrap(),
        ReleaseOutcome::NotQueued
    );
    assert_eq!(line(&repo, &foo), vec!["u1"]);
}

#[test]
fn evict_on_empty_queue_fails_and_changes_nothing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();

    assert!(matches!(
        repo.evict(&foo, None, 10),
        Err(RepoError::EmptyQueue(totem)) if totem == foo
    ));
    assert!(matches!(
        repo.evict(&foo, Some(&id("u1")), 10),
        Err(RepoError::EmptyQueue(_))
    ));
    assert!(repo.snapshot(&foo).unwrap().is_empty());
}

#[test]
fn evict_of_unqueued_target_fails_with_not_queued() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();
    repo.join(&foo, &id("u1"), 10).unwrap();

    let err = repo.evict(&foo, Some(&id("u2")), 20).unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotQueued { ref requester_id, .. } if *requester_id == id("u2")
    ));
    assert_eq!(line(&repo, &foo), vec!["u1"]);
}

#[test]
fn evict_without_target_removes_holder_and_promotes_next() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();
    repo.join(&foo, &id("u1"), 10).unwrap();
    repo.join(&foo, &id("u2"), 20).unwrap();
    repo.join(&foo, &id("u3"), 30).unwrap();

    assert_eq!(
        repo.evict(&foo, None, 700).unwrap(),
        Eviction {
            removed: id("u1"),
            new_holder: Some(id("u2")),
        }
    );
    let entries = repo.snapshot(&foo).unwrap();
    assert_eq!(entries[0].joined_at, 700);
    assert_eq!(line(&repo, &foo), vec!["u2", "u3"]);
}

#[test]
fn evict_of_waiter_does_not_promote() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();
    repo.join(&foo, &id("u1"), 10).unwrap();
    repo.join(&foo, &id("u2"), 20).unwrap();

    assert_eq!(
        repo.evict(&foo, Some(&id("u2")), 700).unwrap(),
        Eviction {
            removed: id("u2"),
            new_holder: None,
        }
    );
    assert_eq!(repo.snapshot(&foo).unwrap()[0].joined_at, 10);
}

#[test]
fn rejoining_after_holding_goes_to_the_back() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();
    repo.join(&foo, &id("u1"), 10).unwrap();
    repo.join(&foo, &id("u2"), 20).unwrap();
    repo.join(&foo, &id("u3"), 30).unwrap();

    repo.release(&foo, &id("u1"), 40).unwrap();
    assert_eq!(
        repo.join(&foo, &id("u1"), 50).unwrap(),
        JoinOutcome::Waiting { rank: 3 }
    );
    assert_eq!(line(&repo, &foo), vec!["u2", "u3", "u1"]);
}

#[test]
fn ranks_stay_dense_after_removals() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    repo.create_totem(&foo, 0).unwrap();
    for (offset, requester) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        repo.join(&foo, &id(requester), offset as i64).unwrap();
    }

    repo.release(&foo, &id("c"), 100).unwrap();
    repo.evict(&foo, Some(&id("e")), 100).unwrap();

    let ranks: Vec<u32> = repo
        .snapshot(&foo)
        .unwrap()
        .iter()
        .map(|entry| entry.rank)
        .collect();
    assert_eq!(ranks, vec![1, 2, 3]);
}

#[test]
fn queues_of_different_totems_are_independent() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    let foo = name("foo");
    let bar = name("bar");
    repo.create_totem(&foo, 0).unwrap();
    repo.create_totem(&bar, 0).unwrap();

    repo.join(&foo, &id("u1"), 10).unwrap();
    assert_eq!(repo.join(&bar, &id("u1"), 10).unwrap(), JoinOutcome::Holder);
    repo.release(&foo, &id("u1"), 20).unwrap();
    assert_eq!(repo.holder(&bar).unwrap(), Some(id("u1")));
}

#[test]
fn destroy_removes_registry_entry_and_waiting_line() {
    let conn = open_db_in_memory().unwrap();
    {
        let repo = SqliteTotemRepository::try_new(&conn).unwrap();
        let foo = name("foo");
        repo.create_totem(&foo, 0).unwrap();
        repo.join(&foo, &id("u1"), 10).unwrap();
        repo.join(&foo, &id("u2"), 20).unwrap();

        assert!(repo.destroy_totem(&foo).unwrap());
        assert!(!repo.totem_exists(&foo).unwrap());
        assert!(!repo.destroy_totem(&foo).unwrap());

        // Re-creating starts from an empty line.
        repo.create_totem(&foo, 30).unwrap();
        assert!(repo.snapshot(&foo).unwrap().is_empty());
    }

    let orphaned: i64 = conn
        .query_row("SELECT COUNT(*) FROM totem_entries;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(orphaned, 0);
}

#[test]
fn list_returns_totems_in_creation_order() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteTotemRepository::try_new(&conn).unwrap();
    repo.create_totem(&name("foo"), 0).unwrap();
    repo.create_totem(&name("bar"), 0).unwrap();
    assert!(!repo.create_totem(&name("FOO"), 0).unwrap());

    let names: Vec<String> = repo
        .list_totems()
        .unwrap()
        .into_iter()
        .map(|totem| totem.name.as_str().to_string())
        .collect();
    assert_eq!(names, vec!["foo".to_string(), "bar".to_string()]);
}

#[test]
fn service_maps_precondition_failures_to_service_errors() {
    let conn = open_db_in_memory().unwrap();
    let service = TotemService::new(SqliteTotemRepository::try_new(&conn).unwrap());
    service.create("foo").unwrap();

    assert!(matches!(
        service.evict("foo", None),
        Err(TotemServiceError::EmptyQueue(_))
    ));
    service.join("foo", &id("u1")).unwrap();
    assert!(matches!(
        service.evict("FOO", Some(&id("u2"))),
        Err(TotemServiceError::NotQueued { .. })
    ));
    assert!(!service.is_empty(" foo ").unwrap());
    assert_eq!(service.snapshot("foo").unwrap().len(), 1);
}

#[test]
fn service_queues_filters_by_known_name_only() {
    let conn = open_db_in_memory().unwrap();
    let service = TotemService::new(SqliteTotemRepository::try_new(&conn).unwrap());
    service.create("foo").unwrap();
    service.create("bar").unwrap();

    assert_eq!(service.queues(Some("Foo")).unwrap().len(), 1);
    assert_eq!(service.queues(Some("invalid")).unwrap().len(), 2);
    assert_eq!(service.queues(None).unwrap().len(), 2);
}

#[test]
fn totem_name_deserialization_normalizes_and_rejects_blank() {
    let parsed: TotemName = serde_json::from_str("\" Foo \"").unwrap();
    assert_eq!(parsed.as_str(), "foo");
    assert!(serde_json::from_str::<TotemName>("\"  \"").is_err());
}
