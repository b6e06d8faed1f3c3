//! Part sync: reconciles the tracker's qualifying work items into the
//! relational store (categories, parts) and the artifact store (design files).
//!
//! Each cycle:
//! - Lists qualifying work items (via `SourceClient`)
//! - Validates them into `PartRecord`s (via `FieldExtractor`)
//! - Stores the design artifact and upserts category and part
//! - Deletes parts, orphan categories and artifacts whose work item no longer qualifies

pub mod engine;
pub mod extract;
pub mod models;
pub mod naming;
pub mod schedule;
pub mod traits;
