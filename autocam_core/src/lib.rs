//! Autocam core library: part sync engine, store backends and shared models.

pub mod config;
pub mod error;
pub mod models;
pub mod o11y;
pub mod reconcile;
pub mod store;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use models::{
    Attachment, Category, CategoryId, NewPart, Part, PartId, PartRecord, RetainedTickets,
    Thickness, Ticket, UpsertOutcome, WorkItem,
};
pub use reconcile::engine::ReconciliationEngine;
pub use reconcile::models::{CleanupReport, CycleSummary, ItemOutcome};
pub use reconcile::schedule::Scheduler;
pub use reconcile::traits::{ArtifactPut, ArtifactStore, RelationalStore, SourceClient};
