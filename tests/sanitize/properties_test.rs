//! Property tests for the sanitizer invariants.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::{Map, Value};

use erp_kernel::sanitize::{is_system_field, resolve_writable, sanitize, SYSTEM_FIELDS};
use erp_kernel::schema::{EntitySchema, FieldKind};

/// Field names drawn from business-looking identifiers and every system
/// spelling, so generated schemas regularly contain both.
fn field_name() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-zA-Z_]{0,12}",
        proptest::sample::select(SYSTEM_FIELDS).prop_map(str::to_owned),
    ]
}

fn schema() -> impl Strategy<Value = EntitySchema> {
    proptest::collection::vec(field_name(), 0..16).prop_map(|names| {
        EntitySchema::from_pairs("generated", names.iter().map(|n| (n.as_str(), FieldKind::Text)))
    })
}

fn input() -> impl Strategy<Value = Map<String, Value>> {
    proptest::collection::btree_map(field_name(), any::<i64>(), 0..16).prop_map(|entries| {
        entries
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect()
    })
}

proptest! {
    #[test]
    fn system_fields_are_never_writable(schema in schema()) {
        let writable = resolve_writable(&schema);
        for field in SYSTEM_FIELDS {
            prop_assert!(!writable.contains(*field));
        }
        for field in &writable {
            prop_assert!(!is_system_field(field));
        }
    }

    #[test]
    fn output_keys_are_a_subset_of_the_allowlist(schema in schema(), input in input()) {
        let writable = resolve_writable(&schema);
        let output = sanitize(&schema, input);
        let keys: BTreeSet<String> = output.keys().cloned().collect();
        prop_assert!(keys.is_subset(&writable));
    }

    #[test]
    fn sanitize_is_idempotent(schema in schema(), input in input()) {
        let once = sanitize(&schema, input);
        let twice = sanitize(&schema, once.clone());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn allowed_values_pass_through_unchanged(schema in schema(), input in input()) {
        let writable = resolve_writable(&schema);
        let output = sanitize(&schema, input.clone());
        for (key, value) in &input {
            if writable.contains(key) {
                prop_assert_eq!(output.get(key), Some(value));
            }
        }
    }
}
