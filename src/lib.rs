//! # Filevault
//!
//! A content-addressed, deduplicating file vault, usable both as a standalone
//! binary and as a library.
//!
//! Identical bytes are stored once on disk and reference counted. Files and
//! folders form one tree per owner; a closure table indexes every ancestor so
//! grants and public flags on a folder reach everything beneath it.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! filevault = { version = "0.0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use filevault::config::VaultConfig;
//! use filevault::vault::{Upload, Vault};
//!
//! let vault = Vault::open(VaultConfig::new("./data"))?;
//! let alice = vault.create_user("alice", "alice@example.com", None)?;
//! let docs = vault.create_folder(alice.id, None, "docs")?;
//!
//! let file = tokio::fs::File::open("report.pdf").await?;
//! let upload = Upload {
//!     owner_id: alice.id,
//!     parent_id: Some(docs.id),
//!     filename: "report.pdf".to_string(),
//!     content_type: "application/pdf".to_string(),
//!     size_hint: None,
//! };
//! let resource = vault.upload(upload, file).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes CLI module. Disable with `default-features = false`.

pub mod access;
pub mod blob;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod store;
pub mod types;
pub mod vault;
