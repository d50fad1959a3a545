//! Outbound side of the sync engine: auth header construction and the
//! HTTP client that pulls raw records from external systems.

pub mod auth;
pub mod client;
pub mod error;

pub use auth::{build_headers, try_build_headers};
pub use client::{extract_records, query_from_filters, FetchClient, FetchRequest};
pub use error::{FetchError, NetworkFailure, Result};
