#![forbid(unsafe_code)]

//! Shared building blocks for the tubegrab backend.
//!
//! The binary in `src/bin/backend.rs` only wires HTTP routes together; the
//! JSON catalog, the yt-dlp adapter and the URL check live here so they can be
//! tested without a running server.

pub mod config;
pub mod error;
pub mod extractor;
pub mod metadata;
pub mod page;
pub mod security;
pub mod validator;
