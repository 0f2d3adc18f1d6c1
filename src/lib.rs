//! lmsarchive library
//!
//! This module exposes the cache, client, and page-building modules for
//! the binary and for integration tests.

pub mod api;
pub mod archive;
pub mod cache;
pub mod cli;
pub mod config;
pub mod html;
