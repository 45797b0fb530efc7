//! Tenant credential storage.
//!
//! Two stores back tenant authorization: a durable [`store::CredentialStore`]
//! that is the only authority on whether a tenant key exists, and a fast
//! [`store::CredentialCache`] holding short-lived projections of it.

pub mod cache;
pub mod sqlite;
pub mod store;
