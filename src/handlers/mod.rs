//! HTTP handlers for the file API and service endpoints.

pub mod files;
pub mod health;
