//! services/api/src/lib.rs
//!
//! The `api` service: configuration, error mapping, adapters for the core
//! ports and the HTTP layer. The binaries in `src/bin` wire these together.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
