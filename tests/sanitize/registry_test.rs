//! Allowlists of the entities generated from `schema/entities.toml`.

use erp_kernel::sanitize::{is_system_field, AllowlistCache, SYSTEM_FIELDS};
use erp_kernel::schema::registry;

#[test]
fn every_registered_entity_has_a_non_empty_allowlist() {
    let cache = AllowlistCache::new();
    for name in registry::entity_names() {
        let schema = registry::entity(name).expect("registered entity");
        let writable = cache.writable(&schema);
        assert!(!writable.is_empty(), "{name} has nothing writable");
        for field in writable.iter() {
            assert!(!is_system_field(field), "{name}.{field} leaked into allowlist");
        }
    }
}

#[test]
fn sales_order_allowlist_matches_business_columns() {
    let schema = registry::entity("sales_order").expect("sales_order");
    let writable: Vec<String> = AllowlistCache::new()
        .writable(&schema)
        .iter()
        .cloned()
        .collect();
    assert_eq!(
        writable,
        vec![
            "attributes",
            "currency",
            "customer_name",
            "notes",
            "number",
            "order_date",
            "status",
            "total_amount",
        ]
    );
}

#[test]
fn every_listed_system_field_is_blocked() {
    for field in SYSTEM_FIELDS {
        assert!(is_system_field(field), "{field} should be blocked");
    }
}
