//! Core data models for the media store.
//!
//! `ObjectRecord` and `ProjectRecord` map to metadata-store rows via
//! `sqlx::FromRow`; `TransferMetadata` is the JSON blob a client attaches to
//! every upload. All of them serialize naturally as JSON via `serde`.

pub mod metadata;
pub mod object;
pub mod project;
