//! Core types for the Vellum wiki storage engine.
//!
//! This crate provides:
//! - Configuration (`WikiConfig`, environment parsing)
//! - The public error taxonomy (`Error`, `Result`)
//! - Revision and page models (`RevisionMeta`, `ChangeKind`, `WriteOutcome`)
//! - Title ↔ repository file name mapping and MIME classification

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod models;
pub mod title;

pub use config::{VcsBackend, WikiConfig};
pub use error::{Error, Result};
pub use models::{ChangeKind, RevisionMeta, WriteOutcome};
pub use title::{file_to_title, is_text_mime, page_mime, title_to_file};
