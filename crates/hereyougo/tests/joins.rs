//! Join queries: scoped SQL, row categorization and grouped results.

mod common;

use common::{MockConnection, Task, scoped_row, scopes_of, text};
use hereyougo::prelude::*;
use std::sync::Arc;

fn task(board: &str, number: i64, title: &str, parent: Option<i64>) -> Vec<(String, Value)> {
    vec![
        ("board".to_string(), text(board)),
        ("number".to_string(), text(&number.to_string())),
        ("title".to_string(), text(title)),
        (
            "parent".to_string(),
            parent.map_or(Value::Null, |p| text(&p.to_string())),
        ),
    ]
}

fn joined(
    parent_scope: &str,
    child_scope: &str,
    parent: &[(String, Value)],
    child: &[(String, Value)],
) -> Row {
    let parent = scoped_row(parent_scope, parent);
    let child = scoped_row(child_scope, child);
    Row::from_pairs(
        parent
            .iter()
            .chain(child.iter())
            .map(|(name, value)| (name.to_string(), value.clone())),
    )
}

/// Tasks joined to their subtasks on the same board.
fn subtasks(session: &mut Session<MockConnection>) -> Query {
    let parents = session.query::<Task>(None, Params::new()).unwrap();
    let children = session.query::<Task>(None, Params::new()).unwrap();
    parents
        .join_on(
            children,
            Expr::col("parent")
                .eq(Expr::parent("number"))
                .and(Expr::col("board").eq(Expr::parent("board"))),
            "subtasks",
        )
        .unwrap()
}

fn respond_with_tree(conn: &MockConnection) {
    conn.respond("JOIN tasks AS ", |sql, _params| {
        let scopes = scopes_of(sql, "tasks");
        let (root, child) = (&scopes[0], &scopes[1]);
        let plan = task("ops", 1, "Plan trip", None);
        let book = task("ops", 2, "Book rooms", Some(1));
        vec![
            joined(root, child, &plan, &book),
            joined(root, child, &plan, &task("ops", 3, "Buy tickets", Some(1))),
            joined(root, child, &book, &task("ops", 5, "Pay deposit", Some(2))),
        ]
    });
}

#[test]
fn self_join_compiles_with_distinct_scopes() {
    let mut session = Session::new(MockConnection::new());
    let query = subtasks(&mut session);
    let (root, child) = (query.scope().to_string(), query.joins()[0].query().scope().to_string());
    assert_ne!(root, child);

    let (sql, params) = query.to_sql().unwrap();
    assert!(sql.starts_with("SELECT "));
    assert!(sql.contains(&format!("FROM tasks AS {root} JOIN tasks AS {child} ON ")));
    assert!(sql.contains(&format!("{child}.parent = {root}.number")));
    assert!(sql.contains(&format!("{child}.board = {root}.board")));
    assert!(sql.contains(&format!("{root}.title AS {root}__title")));
    assert!(params.is_empty());
}

#[test]
fn rows_are_categorized_per_node() {
    let conn = MockConnection::new();
    let mut session = Session::new(conn.clone());
    let query = subtasks(&mut session);

    let row = joined(
        query.scope(),
        query.joins()[0].query().scope(),
        &task("ops", 1, "Plan trip", None),
        &[
            ("board".to_string(), Value::Null),
            ("number".to_string(), Value::Null),
            ("title".to_string(), Value::Null),
            ("parent".to_string(), Value::Null),
        ],
    );
    let slices = query.categorize(&row);
    assert_eq!(slices.len(), 2);
    let root = slices[0].as_ref().unwrap();
    assert_eq!(root.get_text("title").as_deref(), Some("Plan trip"));
    assert!(slices[1].is_none());
}

#[test]
fn joined_results_are_grouped_by_identity() {
    let conn = MockConnection::new();
    respond_with_tree(&conn);
    let mut session = Session::new(conn.clone());
    let query = subtasks(&mut session);

    let roots = session.fetch_joined(&query).unwrap();
    assert_eq!(roots.len(), 2);

    let plan = roots.get(0).unwrap();
    let titles: Vec<String> = plan
        .join("subtasks")
        .unwrap()
        .typed::<Task>()
        .iter()
        .map(|t| t.read().unwrap().title.clone())
        .collect();
    assert_eq!(titles, ["Book rooms", "Buy tickets"]);
    assert!(plan.join("unknown").is_none());

    // "Book rooms" is both a subtask and a root: one instance
    let children = plan.join("subtasks").unwrap().typed::<Task>();
    let book_as_root = roots.get(1).unwrap().typed::<Task>().unwrap();
    assert!(Arc::ptr_eq(&children[0], &book_as_root));
    assert_eq!(roots.get(1).unwrap().join("subtasks").unwrap().len(), 1);

    // Distinct roots through the plain fetch path, answered from cache
    let calls = conn.query_calls();
    let tasks = session.fetch::<Task>(&query).unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(conn.query_calls(), calls);

    let cached = session
        .get::<Task>([("board", text("ops")), ("number", Value::Int(5))])
        .unwrap();
    assert_eq!(cached.read().unwrap().parent, Some(2));
    assert_eq!(conn.query_calls(), calls);
}

#[test]
fn equal_trees_share_a_cache_key() {
    let mut session = Session::new(MockConnection::new());
    let first = subtasks(&mut session);
    let second = subtasks(&mut session);

    assert_ne!(first.scope(), second.scope());
    assert_eq!(first.cache_key(), second.cache_key());

    let filtered = session
        .query::<Task>(Some(Expr::col("board").eq("ops")), Params::new())
        .unwrap();
    assert_ne!(filtered.cache_key(), first.cache_key());
}
