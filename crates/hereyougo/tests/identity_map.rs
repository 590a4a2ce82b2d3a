//! Identity map behaviour: one live instance per class and primary key.

mod common;

use common::{MockConnection, User, text};
use hereyougo::prelude::*;
use std::sync::Arc;

fn users() -> MockConnection {
    let conn = MockConnection::new();
    conn.insert_row(
        "users",
        &[("id", Some("u1")), ("email", Some("ana@example.com")), ("name", Some("Ana"))],
    );
    conn.insert_row(
        "users",
        &[("id", Some("u2")), ("email", Some("bo@example.com")), ("name", Some("Bo"))],
    );
    conn
}

#[test]
fn get_returns_the_same_instance() {
    let conn = users();
    let mut session = Session::new(conn.clone());

    let first = session.get::<User>("u1").unwrap();
    let second = session.get::<User>("u1").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(conn.query_calls(), 1);
    assert_eq!(first.read().unwrap().name, "Ana");
    assert!(first.read().unwrap().state.persisted);
}

#[test]
fn fetched_collections_share_identity_with_lookups() {
    let conn = users();
    let mut session = Session::new(conn.clone());

    let bo = session.get::<User>("u2").unwrap();
    let everyone = session.all::<User>(None, Params::new()).unwrap();

    assert_eq!(everyone.len(), 2);
    let found = everyone
        .iter()
        .find(|user| user.read().unwrap().id == "u2")
        .unwrap();
    assert!(Arc::ptr_eq(found, &bo));
}

#[test]
fn repeated_collection_is_served_from_cache() {
    let conn = users();
    let mut session = Session::new(conn.clone());

    let criteria = Expr::col("email").eq(Expr::placeholder("email"));
    let params = Params::from([(":email".to_string(), text("bo@example.com"))]);

    let first = session.all::<User>(Some(criteria.clone()), params.clone()).unwrap();
    let calls = conn.query_calls();
    let second = session.all::<User>(Some(criteria), params).unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(conn.query_calls(), calls);
    assert!(Arc::ptr_eq(&first[0], &second[0]));
}

#[test]
fn from_data_reuses_and_refreshes_the_cached_instance() {
    let conn = users();
    let mut session = Session::new(conn.clone());

    let ana = session.get::<User>("u1").unwrap();
    let row = Row::from_pairs([
        ("id", text("u1")),
        ("email", text("ana@example.org")),
        ("name", text("Ana Maria")),
    ]);
    let again = session.from_data::<User>(&row).unwrap();

    assert!(Arc::ptr_eq(&ana, &again));
    assert_eq!(ana.read().unwrap().name, "Ana Maria");
    assert_eq!(ana.read().unwrap().email, "ana@example.org");
}

#[test]
fn missing_rows() {
    let conn = users();
    let mut session = Session::new(conn.clone());

    assert!(session.from_primary_key::<User>("nobody", false).unwrap().is_none());

    let err = session.from_primary_key::<User>("nobody", true).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.code(), "entity_not_found");
    assert_eq!(
        err.details(),
        serde_json::json!({ "class": "User", "selector": { "id": "nobody" } })
    );
}

#[test]
fn reset_forgets_every_instance() {
    let conn = users();
    let mut session = Session::new(conn.clone());

    let before = session.get::<User>("u1").unwrap();
    session.reset();
    let after = session.get::<User>("u1").unwrap();

    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(conn.query_calls(), 2);
}
