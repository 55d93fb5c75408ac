mod common;

use agencydb::db::schema::READ_AUDIT_IDENTITY;
use agencydb::pool::PoolRegistry;
use agencydb::{QueryExecutor, SqlParam, Statement};
use common::{FakeConnector, FakeDb, Fault, config, tenant};
use serde_json::json;

fn executor(db: &FakeDb) -> QueryExecutor<FakeConnector> {
    QueryExecutor::new(PoolRegistry::new(db.connector()), &config()).unwrap()
}

#[tokio::test]
async fn failing_statement_rolls_back_the_batch() {
    let db = FakeDb::new();
    db.fail_sql("INSERT INTO invoice_lines", Fault::integrity());
    let exec = executor(&db);

    let batch = vec![
        Statement::new("INSERT INTO invoices (id) VALUES ($1)").bind(9_i64),
        Statement::new("INSERT INTO invoice_lines (invoice_id) VALUES ($1)").bind(9_i64),
        Statement::new("UPDATE customers SET balance = balance + 10"),
    ];

    let err = exec
        .execute_transaction(&tenant("agency_acme_001"), batch, Some("u-42"))
        .await
        .unwrap_err();

    assert_eq!(err.sqlstate(), Some("23505"));
    let state = db.state();
    assert!(state.committed.is_empty());
    assert_eq!(state.attempted.len(), 2);
    assert!(!state.attempted.iter().any(|sql| sql.starts_with("UPDATE customers")));
}

#[tokio::test]
async fn batch_runs_in_order_with_one_identity() {
    let db = FakeDb::new();
    let exec = executor(&db);

    let sets = exec
        .execute_transaction(
            &tenant("agency_acme_001"),
            vec![
                Statement::new("INSERT INTO purchase_orders (id) VALUES (1)"),
                Statement::new("UPDATE inventory_items SET reserved = reserved + 1"),
            ],
            Some("u-42"),
        )
        .await
        .unwrap();

    assert_eq!(sets.len(), 2);
    let state = db.state();
    let sqls: Vec<_> = state.committed.iter().map(|c| c.sql.as_str()).collect();
    assert_eq!(
        sqls,
        vec![
            "INSERT INTO purchase_orders (id) VALUES (1)",
            "UPDATE inventory_items SET reserved = reserved + 1"
        ]
    );
    assert!(
        state
            .committed
            .iter()
            .all(|c| c.acting_user.as_deref() == Some("u-42"))
    );
}

#[tokio::test]
async fn empty_batch_does_not_touch_the_pool() {
    let db = FakeDb::new();
    let exec = executor(&db);

    let sets = exec
        .execute_transaction(&tenant("agency_acme_001"), Vec::new(), None)
        .await
        .unwrap();

    assert!(sets.is_empty());
    assert_eq!(db.state().connects, 0);
}

// Only the executor's side is checked here: the identity is handed to the pool
// for the call that carries it and never for a later one. Clearing the setting
// on a reused connection is the pool's job; see the live Postgres tests.
#[tokio::test]
async fn acting_user_is_stamped_only_on_its_own_call() {
    let db = FakeDb::new();
    let exec = executor(&db);
    let t = tenant("agency_acme_001");

    exec.execute(
        &t,
        "UPDATE public.invoices SET status='paid' WHERE id=$1",
        vec![SqlParam::from(1_i64)],
        Some("u-42"),
    )
    .await
    .unwrap();

    {
        let state = db.state();
        let update = &state.committed[0];
        assert_eq!(update.acting_user.as_deref(), Some("u-42"));
        assert_eq!(update.audit_seen, "u-42");
    }

    let later = exec
        .execute(
            &t,
            READ_AUDIT_IDENTITY,
            vec![SqlParam::from("app.current_user_id")],
            None,
        )
        .await
        .unwrap();
    assert_eq!(later.scalar("acting_user"), Some(&json!("")));

    exec.execute(&t, "UPDATE public.invoices SET status='sent'", vec![], None)
        .await
        .unwrap();
    let state = db.state();
    let unstamped = state.committed.last().unwrap();
    assert_eq!(unstamped.acting_user, None);
    assert_eq!(unstamped.audit_seen, "");
}
