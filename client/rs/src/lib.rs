//! Shared types for the testenv operator.
//!
//! The [entities] module holds the custom resources managed by the
//! operator (`Environment`, `Build`, `Database`, `DatabaseTemplate`
//! and the istio `VirtualService` used for routing), along with the
//! core configuration schema.

pub mod entities;
