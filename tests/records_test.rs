mod helpers;

use tessera::projects;
use tessera::records::{self, NewRecord, RecordError, RecordKind};

fn revise(
    store: &tessera::db::Store,
    project_id: &str,
    kind: RecordKind,
    thread_id: &str,
    body: &str,
) -> Result<records::Record, RecordError> {
    let record = NewRecord {
        thread_id: Some(thread_id.to_string()),
        ..NewRecord::new(kind, body)
    };
    records::store_record(store, project_id, record)
}

#[test]
fn revisions_share_a_thread_and_latest_wins() {
    let (store, project) = helpers::test_store();
    let first = records::store_record(
        &store,
        &project.id,
        NewRecord::new(RecordKind::Decision, "Use REST"),
    )
    .unwrap();
    let second = revise(&store, &project.id, RecordKind::Decision, &first.thread_id, "Use JSON-RPC").unwrap();
    let third = revise(&store, &project.id, RecordKind::Decision, &first.thread_id, "Use JSON-RPC over HTTP").unwrap();

    assert_eq!(second.thread_id, first.thread_id);
    assert_eq!(third.thread_id, first.thread_id);
    assert_ne!(first.id, third.id);
    assert!(third.seq > second.seq);

    let latest = records::latest(&store, &project.id, &first.thread_id).unwrap().unwrap();
    assert_eq!(latest.id, third.id);

    let history = records::history(&store, &project.id, &first.thread_id).unwrap();
    let bodies: Vec<&str> = history.iter().map(|r| r.body.as_str()).collect();
    assert_eq!(bodies, vec!["Use REST", "Use JSON-RPC", "Use JSON-RPC over HTTP"]);
}

#[test]
fn equal_timestamps_fall_back_to_sequence() {
    let (store, project) = helpers::test_store();
    let first = records::store_record(&store, &project.id, NewRecord::new(RecordKind::Insight, "a")).unwrap();
    let second = revise(&store, &project.id, RecordKind::Insight, &first.thread_id, "b").unwrap();

    store
        .conn()
        .execute(
            "UPDATE records SET created_at = ?1 WHERE thread_id = ?2",
            [first.created_at.as_str(), first.thread_id.as_str()],
        )
        .unwrap();

    let latest = records::latest(&store, &project.id, &first.thread_id).unwrap().unwrap();
    assert_eq!(latest.id, second.id);
}

#[test]
fn thread_of_another_kind_is_rejected() {
    let (store, project) = helpers::test_store();
    let insight = records::store_record(&store, &project.id, NewRecord::new(RecordKind::Insight, "x")).unwrap();

    let err = revise(&store, &project.id, RecordKind::Decision, &insight.thread_id, "y").unwrap_err();
    assert!(matches!(err, RecordError::Validation(_)));
}

#[test]
fn unknown_and_foreign_threads_are_rejected() {
    let (store, project) = helpers::test_store();
    let err = revise(&store, &project.id, RecordKind::Context, "cthr_AAAAAAAAAAAA", "y").unwrap_err();
    assert!(matches!(err, RecordError::UnknownThread(_)));

    let other = projects::create(&store, "other", "Other").unwrap();
    let theirs = records::store_record(&store, &other.id, NewRecord::new(RecordKind::Context, "theirs")).unwrap();
    let err = revise(&store, &project.id, RecordKind::Context, &theirs.thread_id, "mine").unwrap_err();
    assert!(matches!(err, RecordError::UnknownThread(_)));
}

#[test]
fn listing_shows_only_latest_revisions_per_project() {
    let (store, project) = helpers::test_store();
    let a = records::store_record(&store, &project.id, NewRecord::new(RecordKind::Insight, "a1")).unwrap();
    records::store_record(&store, &project.id, NewRecord::new(RecordKind::Insight, "b1")).unwrap();
    revise(&store, &project.id, RecordKind::Insight, &a.thread_id, "a2").unwrap();

    let other = projects::create(&store, "other", "Other").unwrap();
    records::store_record(&store, &other.id, NewRecord::new(RecordKind::Insight, "elsewhere")).unwrap();

    let listed = records::list_latest(&store, &project.id, RecordKind::Insight, 10).unwrap();
    let bodies: Vec<&str> = listed.iter().map(|r| r.body.as_str()).collect();
    assert_eq!(bodies, vec!["a2", "b1"]);

    let hits = records::search(&store, &project.id, "a", None, 10).unwrap();
    assert!(hits.iter().all(|r| r.project_id == project.id));
    assert!(!hits.iter().any(|r| r.body == "a1"));
}
