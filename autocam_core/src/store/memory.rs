//! In-process backends for local runs and tests.

use crate::models::{
    Attachment, Category, CategoryId, NewPart, Part, PartId, RetainedTickets, Thickness,
    UpsertOutcome, WorkItem,
};
use crate::reconcile::traits::{ArtifactPut, ArtifactStore, RelationalStore, SourceClient};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Scriptable tracker.
#[derive(Default)]
pub struct InMemorySource {
    items: RwLock<Vec<WorkItem>>,
    epics: RwLock<HashMap<String, String>>,
    bodies: RwLock<HashMap<String, Bytes>>,
    fail_listing: AtomicBool,
    fail_epic_lookups: AtomicBool,
    list_latency: RwLock<Duration>,
    list_calls: AtomicUsize,
    epic_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_items(&self, items: Vec<WorkItem>) {
        *self.items.write().await = items;
    }

    pub async fn set_epic(&self, epic_ref: &str, summary: &str) {
        self.epics
            .write()
            .await
            .insert(epic_ref.to_string(), summary.to_string());
    }

    /// Register the body served for an attachment's `content_url`.
    pub async fn set_attachment_body(&self, content_url: &str, body: impl Into<Bytes>) {
        self.bodies
            .write()
            .await
            .insert(content_url.to_string(), body.into());
    }

    /// Make `list_qualifying_items` fail until reset.
    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    /// Make `resolve_epic_summary` reject the credentials until reset.
    pub fn fail_epic_lookups(&self, fail: bool) {
        self.fail_epic_lookups.store(fail, Ordering::SeqCst);
    }

    /// Delay every listing by `latency` (tokio time, so paused clocks apply).
    pub async fn set_list_latency(&self, latency: Duration) {
        *self.list_latency.write().await = latency;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn epic_calls(&self) -> usize {
        self.epic_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceClient for InMemorySource {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn list_qualifying_items(&self) -> Result<Vec<WorkItem>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.list_latency.read().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(Error::BackendMessage("tracker unavailable".to_string()));
        }
        Ok(self.items.read().await.clone())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn resolve_epic_summary(&self, epic_ref: &str) -> Result<String> {
        self.epic_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_epic_lookups.load(Ordering::SeqCst) {
            return Err(Error::Unauthorized("tracker rejected credentials".to_string()));
        }
        self.epics
            .read()
            .await
            .get(epic_ref)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("epic {epic_ref}")))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(filename = %attachment.filename))]
    async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Bytes> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.bodies
            .read()
            .await
            .get(&attachment.content_url)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("attachment {}", attachment.content_url)))
    }
}

/// Map-backed artifact store.
#[derive(Default)]
pub struct InMemoryArtifactStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
    fail_writes: AtomicBool,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Sorted snapshot of every stored key.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    /// Seed an object directly, bypassing write failures.
    pub async fn insert(&self, key: &str, body: impl Into<Bytes>) {
        self.objects
            .write()
            .await
            .insert(key.to_string(), body.into());
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    #[tracing::instrument(level = "debug", skip(self, body))]
    async fn put_if_absent(&self, key: &str, body: Bytes) -> Result<ArtifactPut> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::BackendMessage(format!("artifact write failed: {key}")));
        }
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Ok(ArtifactPut::AlreadyPresent);
        }
        objects.insert(key.to_string(), body);
        Ok(ArtifactPut::Stored)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}

#[derive(Default)]
struct RelationalState {
    categories: BTreeMap<CategoryId, Category>,
    parts: BTreeMap<PartId, Part>,
    next_category: i64,
    next_part: i64,
}

/// Relational store with the same uniqueness rules as the Postgres schema.
///
/// A single mutex serialises every operation, which stands in for the
/// database's unique constraints.
#[derive(Default)]
pub struct InMemoryRelationalStore {
    state: Mutex<RelationalState>,
    fail_category_writes: AtomicBool,
    fail_part_writes: AtomicBool,
}

impl InMemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_category_writes(&self, fail: bool) {
        self.fail_category_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_part_writes(&self, fail: bool) {
        self.fail_part_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn categories(&self) -> Vec<Category> {
        self.state.lock().await.categories.values().cloned().collect()
    }

    pub async fn parts(&self) -> Vec<Part> {
        self.state.lock().await.parts.values().cloned().collect()
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_category(
        &self,
        material: &str,
        thickness: Thickness,
    ) -> Result<Option<Category>> {
        let state = self.state.lock().await;
        Ok(state
            .categories
            .values()
            .find(|c| c.material == material && c.thickness == thickness)
            .cloned())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn insert_category(
        &self,
        material: &str,
        thickness: Thickness,
    ) -> Result<UpsertOutcome<Category>> {
        if self.fail_category_writes.load(Ordering::SeqCst) {
            return Err(Error::BackendMessage("category insert failed".to_string()));
        }
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .categories
            .values()
            .find(|c| c.material == material && c.thickness == thickness)
        {
            return Ok(UpsertOutcome::AlreadyExists(existing.clone()));
        }
        state.next_category += 1;
        let category = Category {
            id: CategoryId(state.next_category),
            material: material.to_string(),
            thickness,
        };
        state.categories.insert(category.id, category.clone());
        Ok(UpsertOutcome::Created(category))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find_part_by_name(&self, name: &str) -> Result<Option<Part>> {
        let state = self.state.lock().await;
        Ok(state.parts.values().find(|p| p.name == name).cloned())
    }

    #[tracing::instrument(level = "debug", skip(self, part), fields(part_name = %part.name))]
    async fn insert_part(&self, part: &NewPart) -> Result<UpsertOutcome<Part>> {
        if self.fail_part_writes.load(Ordering::SeqCst) {
            return Err(Error::BackendMessage("part insert failed".to_string()));
        }
        let mut state = self.state.lock().await;
        if let Some(existing) = state.parts.values().find(|p| p.name == part.name) {
            return Ok(UpsertOutcome::AlreadyExists(existing.clone()));
        }
        if !state.categories.contains_key(&part.category_id) {
            return Err(Error::NotFound(format!("category {}", part.category_id)));
        }
        state.next_part += 1;
        let row = Part {
            id: PartId(state.next_part),
            name: part.name.clone(),
            epic: part.epic.clone(),
            ticket: part.ticket.clone(),
            quantity: part.quantity,
            category_id: part.category_id,
        };
        state.parts.insert(row.id, row.clone());
        Ok(UpsertOutcome::Created(row))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(retained = retained.len()))]
    async fn delete_parts_not_in(&self, retained: &RetainedTickets) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.parts.len();
        state.parts.retain(|_, p| retained.contains(&p.ticket));
        Ok((before - state.parts.len()) as u64)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_orphan_categories(&self) -> Result<u64> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let before = state.categories.len();
        let parts = &state.parts;
        state
            .categories
            .retain(|id, _| parts.values().any(|p| p.category_id == *id));
        Ok((before - state.categories.len()) as u64)
    }
}
