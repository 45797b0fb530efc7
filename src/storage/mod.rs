//! Object storage backends.
//!
//! The [`backend::ObjectStore`] trait abstracts over where tenant files
//! physically live.  Implementations include an in-memory map, local disk,
//! and a gateway to AWS S3.

pub mod aws;
pub mod backend;
pub mod local;
pub mod memory;
