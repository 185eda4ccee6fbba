//! Tests for `src/store/writer.rs`: sanitized writes through the store.

use serde_json::{json, Map, Value};

use erp_kernel::envelope::{ErrorClass, ErrorCode};
use erp_kernel::sanitize::SanitizePolicy;
use erp_kernel::scope::WriteContext;
use erp_kernel::store::aggregate::{AggregateReader, ReadError};
use erp_kernel::store::writer::WriteError;

use super::support::{record, setup_store, tenant};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn ctx(org: &str) -> WriteContext {
    WriteContext::new(tenant(org))
}

#[tokio::test]
async fn create_ignores_forged_system_fields() {
    let store = setup_store(SanitizePolicy::Drop).await;

    let header = object(json!({
        "id": "forged",
        "org_id": "org-B",
        "orgId": "org-B",
        "version": 99,
        "customer_name": "Acme",
        "total_amount": 12.5
    }));
    let lines = vec![
        object(json!({"order_id": "elsewhere", "sku": "A", "taxable": true})),
        object(json!({"sku": "B", "line_no": 7, "deleted_at": "2026-01-01T00:00:00Z"})),
    ];

    let id = store
        .create_aggregate("sales_order", &ctx("org-A"), header, lines)
        .await
        .expect("create should succeed");
    assert_ne!(id.as_str(), "forged");

    let aggregate = store
        .read_aggregate("sales_order", &tenant("org-A"), &id)
        .await
        .expect("created aggregate is readable");

    assert_eq!(aggregate.header.get("id"), Some(&json!(id.as_str())));
    assert_eq!(aggregate.header.get("org_id"), Some(&json!("org-A")));
    assert_eq!(aggregate.header.get("version"), Some(&json!(1)));
    assert_eq!(aggregate.header.get("customer_name"), Some(&json!("Acme")));
    assert_eq!(aggregate.header.get("total_amount"), Some(&json!("12.5")));

    assert_eq!(aggregate.lines.len(), 2);
    for line in &aggregate.lines {
        assert_eq!(line.get("order_id"), Some(&json!(id.as_str())));
        assert_eq!(line.get("org_id"), Some(&json!("org-A")));
        assert_eq!(line.get("deleted_at"), Some(&Value::Null));
    }
    assert_eq!(aggregate.lines[0].get("sku"), Some(&json!("A")));
    assert_eq!(aggregate.lines[0].get("line_no"), Some(&json!(1)));
    assert_eq!(aggregate.lines[0].get("taxable"), Some(&json!(true)));
    assert_eq!(aggregate.lines[1].get("line_no"), Some(&json!(7)));

    // The forged tenant sees nothing.
    let foreign = store
        .read_aggregate("sales_order", &tenant("org-B"), &id)
        .await;
    assert!(matches!(foreign, Err(ReadError::NotFound)));

    store.shutdown().await;
}

#[tokio::test]
async fn create_records_the_actor() {
    let store = setup_store(SanitizePolicy::Drop).await;
    let ctx = ctx("org-A").with_actor(record("user-7"));

    let id = store
        .create_aggregate(
            "sales_order",
            &ctx,
            object(json!({"customer_name": "Acme", "created_by": "mallory"})),
            Vec::new(),
        )
        .await
        .expect("create should succeed");

    let aggregate = store
        .read_aggregate("sales_order", &tenant("org-A"), &id)
        .await
        .expect("readable");
    assert_eq!(aggregate.header.get("created_by"), Some(&json!("user-7")));
    assert_eq!(aggregate.header.get("updated_by"), Some(&json!("user-7")));
    assert!(aggregate.lines.is_empty());

    store.shutdown().await;
}

#[tokio::test]
async fn null_line_order_gets_the_default_position() {
    let store = setup_store(SanitizePolicy::Drop).await;

    let id = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"customer_name": "Acme"})),
            vec![
                object(json!({"sku": "A", "line_no": null})),
                object(json!({"sku": "B"})),
            ],
        )
        .await
        .expect("null order is treated as absent");

    let aggregate = store
        .read_aggregate("sales_order", &tenant("org-A"), &id)
        .await
        .expect("readable");
    assert_eq!(aggregate.lines.len(), 2);
    assert_eq!(aggregate.lines[0].get("sku"), Some(&json!("A")));
    assert_eq!(aggregate.lines[0].get("line_no"), Some(&json!(1)));
    assert_eq!(aggregate.lines[1].get("line_no"), Some(&json!(2)));

    store.shutdown().await;
}

#[tokio::test]
async fn non_integer_line_order_is_a_validation_error() {
    let store = setup_store(SanitizePolicy::Drop).await;

    let err = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"customer_name": "Acme"})),
            vec![object(json!({"sku": "A", "line_no": "first"}))],
        )
        .await
        .expect_err("order column must be an integer");
    assert!(matches!(err, WriteError::Input(_)));
    assert_eq!(err.code(), ErrorCode::Validation);
    assert!(err.public_message().contains("line_no"));

    let (headers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sales_order")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(headers, 0, "failed create must not leave a header behind");

    store.shutdown().await;
}

#[tokio::test]
async fn decimal_amounts_round_trip_exactly() {
    let store = setup_store(SanitizePolicy::Drop).await;

    let id = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"customer_name": "Acme", "total_amount": "12345678901234567.89"})),
            vec![object(json!({"sku": "A", "unit_price": "10.50", "quantity": 3}))],
        )
        .await
        .expect("create");

    let aggregate = store
        .read_aggregate("sales_order", &tenant("org-A"), &id)
        .await
        .expect("readable");
    assert_eq!(
        aggregate.header.get("total_amount"),
        Some(&json!("12345678901234567.89"))
    );
    assert_eq!(aggregate.lines[0].get("unit_price"), Some(&json!("10.50")));
    assert_eq!(aggregate.lines[0].get("quantity"), Some(&json!("3")));

    let version = store
        .update_header(
            "sales_order",
            &ctx("org-A"),
            &id,
            object(json!({"total_amount": "0.10"})),
        )
        .await
        .expect("update");
    assert_eq!(version, 2);
    let aggregate = store
        .read_aggregate("sales_order", &tenant("org-A"), &id)
        .await
        .expect("readable");
    assert_eq!(aggregate.header.get("total_amount"), Some(&json!("0.10")));

    store.shutdown().await;
}

#[tokio::test]
async fn malformed_decimal_is_a_validation_error() {
    let store = setup_store(SanitizePolicy::Drop).await;

    let err = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"customer_name": "Acme", "total_amount": "12,50"})),
            Vec::new(),
        )
        .await
        .expect_err("comma is not a decimal separator");
    assert_eq!(err.code(), ErrorCode::Validation);
    assert!(!err.public_message().contains("12,50"));

    store.shutdown().await;
}

#[tokio::test]
async fn reject_policy_refuses_payload_and_writes_nothing() {
    let store = setup_store(SanitizePolicy::Reject).await;

    let err = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"id": "forged", "customer_name": "Acme"})),
            Vec::new(),
        )
        .await
        .expect_err("reject policy must refuse system fields");
    assert!(matches!(err, WriteError::Rejected(_)));
    assert_eq!(err.code(), ErrorCode::Validation);
    assert!(err.public_message().contains("id"));

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sales_order")
        .fetch_one(store.pool())
        .await
        .expect("count");
    assert_eq!(count, 0);

    store.shutdown().await;
}

#[tokio::test]
async fn reject_policy_checks_line_payloads_too() {
    let store = setup_store(SanitizePolicy::Reject).await;

    let err = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"customer_name": "Acme"})),
            vec![object(json!({"sku": "A", "orgId": "org-B"}))],
        )
        .await
        .expect_err("line carries a system field");
    assert!(matches!(err, WriteError::Rejected(_)));

    store.shutdown().await;
}

#[tokio::test]
async fn update_bumps_version_and_keeps_tenant() {
    let store = setup_store(SanitizePolicy::Drop).await;
    let id = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"customer_name": "Acme"})),
            Vec::new(),
        )
        .await
        .expect("create");

    let version = store
        .update_header(
            "sales_order",
            &ctx("org-A"),
            &id,
            object(json!({"customer_name": "Globex", "version": 50, "org_id": "org-B"})),
        )
        .await
        .expect("update should succeed");
    assert_eq!(version, 2);

    let aggregate = store
        .read_aggregate("sales_order", &tenant("org-A"), &id)
        .await
        .expect("still owned by org-A");
    assert_eq!(aggregate.header.get("customer_name"), Some(&json!("Globex")));
    assert_eq!(aggregate.header.get("version"), Some(&json!(2)));

    store.shutdown().await;
}

#[tokio::test]
async fn update_with_nothing_writable_returns_current_version() {
    let store = setup_store(SanitizePolicy::Drop).await;
    let id = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"customer_name": "Acme"})),
            Vec::new(),
        )
        .await
        .expect("create");

    let version = store
        .update_header(
            "sales_order",
            &ctx("org-A"),
            &id,
            object(json!({"id": "other", "updatedAt": "2000-01-01"})),
        )
        .await
        .expect("no-op update");
    assert_eq!(version, 1);

    let missing = store
        .update_header(
            "sales_order",
            &ctx("org-B"),
            &id,
            object(json!({"id": "other"})),
        )
        .await;
    assert!(matches!(missing, Err(WriteError::NotFound)));

    store.shutdown().await;
}

#[tokio::test]
async fn cross_tenant_update_and_delete_are_not_found() {
    let store = setup_store(SanitizePolicy::Drop).await;
    let id = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"customer_name": "Acme"})),
            vec![object(json!({"sku": "A"}))],
        )
        .await
        .expect("create");

    let update = store
        .update_header(
            "sales_order",
            &ctx("org-B"),
            &id,
            object(json!({"customer_name": "Hijacked"})),
        )
        .await;
    assert!(matches!(update, Err(WriteError::NotFound)));

    let delete = store.soft_delete("sales_order", &ctx("org-B"), &id).await;
    assert!(matches!(delete, Err(WriteError::NotFound)));

    let aggregate = store
        .read_aggregate("sales_order", &tenant("org-A"), &id)
        .await
        .expect("untouched");
    assert_eq!(aggregate.header.get("customer_name"), Some(&json!("Acme")));
    assert_eq!(aggregate.header.get("version"), Some(&json!(1)));
    assert_eq!(aggregate.lines.len(), 1);

    store.shutdown().await;
}

#[tokio::test]
async fn soft_delete_hides_header_and_lines() {
    let store = setup_store(SanitizePolicy::Drop).await;
    let id = store
        .create_aggregate(
            "sales_order",
            &ctx("org-A"),
            object(json!({"customer_name": "Acme"})),
            vec![object(json!({"sku": "A"})), object(json!({"sku": "B"}))],
        )
        .await
        .expect("create");

    store
        .soft_delete("sales_order", &ctx("org-A"), &id)
        .await
        .expect("delete should succeed");

    let read = store
        .read_aggregate("sales_order", &tenant("org-A"), &id)
        .await;
    assert!(matches!(read, Err(ReadError::NotFound)));

    let (live_lines,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM sales_order_line WHERE order_id = ?1 AND deleted_at IS NULL",
    )
    .bind(id.as_str())
    .fetch_one(store.pool())
    .await
    .expect("count");
    assert_eq!(live_lines, 0);

    let again = store.soft_delete("sales_order", &ctx("org-A"), &id).await;
    assert!(matches!(again, Err(WriteError::NotFound)));

    let update = store
        .update_header(
            "sales_order",
            &ctx("org-A"),
            &id,
            object(json!({"customer_name": "Zombie"})),
        )
        .await;
    assert!(matches!(update, Err(WriteError::NotFound)));

    store.shutdown().await;
}

#[tokio::test]
async fn invoice_lines_follow_position_order() {
    let store = setup_store(SanitizePolicy::Drop).await;
    let id = store
        .create_aggregate(
            "purchase_invoice",
            &ctx("org-A"),
            object(json!({"supplier_name": "Initech", "paid": false})),
            vec![
                object(json!({"memo": "second", "position": 2})),
                object(json!({"memo": "first", "position": 1})),
            ],
        )
        .await
        .expect("create");

    let aggregate = store
        .read_aggregate("purchase_invoice", &tenant("org-A"), &id)
        .await
        .expect("readable");
    assert_eq!(aggregate.header.get("paid"), Some(&json!(false)));
    let memos: Vec<&Value> = aggregate
        .lines
        .iter()
        .filter_map(|line| line.get("memo"))
        .collect();
    assert_eq!(memos, vec![&json!("first"), &json!("second")]);

    store.shutdown().await;
}

#[tokio::test]
async fn unknown_aggregate_is_rejected_before_the_writer() {
    let store = setup_store(SanitizePolicy::Drop).await;

    let err = store
        .create_aggregate("customer", &ctx("org-A"), Map::new(), Vec::new())
        .await
        .expect_err("customer is not an aggregate");
    assert!(matches!(err, WriteError::Input(_)));
    assert_eq!(err.code(), ErrorCode::Validation);

    store.shutdown().await;
}
