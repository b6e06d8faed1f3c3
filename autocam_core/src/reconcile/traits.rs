use crate::Result;
use crate::models::{
    Attachment, Category, NewPart, Part, RetainedTickets, Thickness, UpsertOutcome, WorkItem,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Read-only view of the authoritative tracker.
///
/// Connector implementations live in `autocam_integrations`.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Every work item currently matching the qualifying filter.
    ///
    /// A failed read must surface as `Err`; it is never reported as zero items.
    async fn list_qualifying_items(&self) -> Result<Vec<WorkItem>>;

    /// Summary (display name) of the epic referenced by a work item.
    async fn resolve_epic_summary(&self, epic_ref: &str) -> Result<String>;

    /// Download the body of an attachment.
    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Bytes>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactPut {
    Stored,
    AlreadyPresent,
}

/// Key/value blob store holding design artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Write `body` under `key` unless an object is already there.
    ///
    /// Must be safe under duplicate and concurrent calls for the same key.
    async fn put_if_absent(&self, key: &str, body: Bytes) -> Result<ArtifactPut>;

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Relational store holding categories and parts.
///
/// Rows are inserted or deleted, never updated.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn find_category(&self, material: &str, thickness: Thickness)
    -> Result<Option<Category>>;

    /// Insert a category, returning the existing row on a `(material, thickness)` conflict.
    async fn insert_category(
        &self,
        material: &str,
        thickness: Thickness,
    ) -> Result<UpsertOutcome<Category>>;

    async fn find_part_by_name(&self, name: &str) -> Result<Option<Part>>;

    /// Insert a part, returning the existing row untouched on a `name` conflict.
    async fn insert_part(&self, part: &NewPart) -> Result<UpsertOutcome<Part>>;

    /// Delete every part whose ticket is not retained. Returns rows deleted.
    async fn delete_parts_not_in(&self, retained: &RetainedTickets) -> Result<u64>;

    /// Delete every category no part references. Returns rows deleted.
    async fn delete_orphan_categories(&self) -> Result<u64>;

    /// Find-or-create for categories.
    async fn upsert_category(
        &self,
        material: &str,
        thickness: Thickness,
    ) -> Result<UpsertOutcome<Category>> {
        match self.find_category(material, thickness).await? {
            Some(existing) => Ok(UpsertOutcome::AlreadyExists(existing)),
            None => self.insert_category(material, thickness).await,
        }
    }

    /// Insert-if-absent for parts, keyed by name.
    async fn upsert_part(&self, part: &NewPart) -> Result<UpsertOutcome<Part>> {
        match self.find_part_by_name(&part.name).await? {
            Some(existing) => Ok(UpsertOutcome::AlreadyExists(existing)),
            None => self.insert_part(part).await,
        }
    }
}
