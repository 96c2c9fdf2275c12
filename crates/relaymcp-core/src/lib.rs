//! Shared foundation for the RelayMCP crate family.
//!
//! This crate is the one every other `relaymcp-*` crate depends on. It holds
//! nothing transport- or storage-specific: just the error taxonomy (§7 of the
//! design), timestamp helpers, and the log-sanitization rules that the Tool
//! Registry and the OAuth components both need.

mod error;
pub mod sanitize;
pub mod time;

pub use error::{Error, ErrorCategory, RecoveryHint, Result, Severity};
