//! Kernel-managed (system) field registry.
//!
//! These columns are written only by the kernel write path or database
//! defaults. Every naming convention a caller might use is listed, and
//! lookups also go through a canonical form so spellings that are not
//! listed (`ORG_ID`, `org-id`, `Org_Id`) are still caught.

/// Every blocked spelling of every kernel-managed field.
pub const SYSTEM_FIELDS: &[&str] = &[
    // identity
    "id",
    "ID",
    "_id",
    // tenant scope
    "org_id",
    "orgId",
    "organization_id",
    "organizationId",
    "tenant_id",
    "tenantId",
    // audit timestamps and actors
    "created_at",
    "createdAt",
    "created_by",
    "createdBy",
    "updated_at",
    "updatedAt",
    "updated_by",
    "updatedBy",
    // optimistic concurrency
    "version",
    // soft delete
    "deleted_at",
    "deletedAt",
    "deleted_by",
    "deletedBy",
    "is_deleted",
    "isDeleted",
    // search-index cache
    "search_text",
    "searchText",
    "search_vector",
    "searchVector",
];

/// Reduce a field name to its canonical form: ASCII lowercase with `_` and
/// `-` removed, so `orgId`, `org_id`, `ORG-ID` all map to `orgid`.
pub fn canonical(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Returns `true` if `name` is a kernel-managed field under any spelling.
pub fn is_system_field(name: &str) -> bool {
    if SYSTEM_FIELDS.contains(&name) {
        return true;
    }
    let wanted = canonical(name);
    SYSTEM_FIELDS.iter().any(|f| canonical(f) == wanted)
}
