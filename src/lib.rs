//! ERP kernel: write sanitization and tenant-scoped aggregate reads.
//!
//! Entity field lists are generated at build time from
//! `schema/entities.toml`. From them the kernel derives which fields API
//! callers may set ([`sanitize`]), and reads header/line aggregates with
//! tenant isolation and uniform not-found semantics ([`store`]).
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod envelope;
pub mod logging;
pub mod sanitize;
pub mod schema;
pub mod scope;
pub mod store;
