use crate::config::DEFAULT_ARTIFACT_PREFIX;
use crate::models::{Attachment, NewPart, PartRecord, RetainedTickets, Ticket, WorkItem};
use crate::reconcile::extract::FieldExtractor;
use crate::reconcile::models::{
    CleanupReport, CleanupSkipReason, CycleSummary, ItemOutcome, StepFailure, SyncStep,
};
use crate::reconcile::naming::ArtifactKey;
use crate::reconcile::traits::{ArtifactPut, ArtifactStore, RelationalStore, SourceClient};
use crate::Result;
use chrono::Utc;
use futures_util::{StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

/// Brings the relational and artifact stores in line with the tracker.
///
/// A cycle is a sequence of idempotent steps; a crash at any point is repaired
/// by the next cycle. Cleanup never runs against an empty retained set.
pub struct ReconciliationEngine {
    source: Arc<dyn SourceClient>,
    artifacts: Arc<dyn ArtifactStore>,
    relational: Arc<dyn RelationalStore>,
    extractor: FieldExtractor,
    artifact_prefix: String,
    item_concurrency: usize,
}

impl ReconciliationEngine {
    pub fn new(
        source: Arc<dyn SourceClient>,
        artifacts: Arc<dyn ArtifactStore>,
        relational: Arc<dyn RelationalStore>,
    ) -> Self {
        Self {
            extractor: FieldExtractor::new(source.clone()),
            source,
            artifacts,
            relational,
            artifact_prefix: DEFAULT_ARTIFACT_PREFIX.to_string(),
            item_concurrency: 1,
        }
    }

    pub fn with_artifact_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.artifact_prefix = prefix.into();
        self
    }

    /// Number of work items synced at once. Values below 1 are clamped to 1.
    pub fn with_item_concurrency(mut self, concurrency: usize) -> Self {
        self.item_concurrency = concurrency.max(1);
        self
    }

    /// Run one full cycle: list, sync every item, then clean up.
    ///
    /// Returns `Err` when the tracker fails, either while listing or while
    /// resolving an epic. Nothing is deleted in that case.
    #[tracing::instrument(level = "info", skip(self), fields(cycle_id = tracing::field::Empty))]
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let cycle_id = Uuid::new_v4();
        tracing::Span::current().record("cycle_id", tracing::field::display(cycle_id));
        let started_at = Utc::now();

        let items = self.source.list_qualifying_items().await?;
        let raw_tickets: BTreeSet<Ticket> = items.iter().map(|i| i.ticket.clone()).collect();
        tracing::info!(found = items.len(), "listed qualifying work items");

        let synced: Vec<(ItemOutcome, Option<String>)> = futures_util::stream::iter(
            items.iter().map(|item| self.sync_item(item)).collect::<Vec<_>>(),
        )
        .buffer_unordered(self.item_concurrency)
        .try_collect()
        .await
        .inspect_err(|e| tracing::error!(error = %e, "tracker failed mid-cycle; skipping cleanup"))?;
        let (outcomes, rendered): (Vec<ItemOutcome>, Vec<Option<String>>) =
            synced.into_iter().unzip();
        let rendered_keys: BTreeSet<String> = rendered.into_iter().flatten().collect();

        let retained: BTreeSet<Ticket> = outcomes
            .iter()
            .filter(|o| o.is_retained())
            .map(|o| o.ticket().clone())
            .collect();

        let cleanup = if raw_tickets.is_empty() {
            tracing::warn!("tracker returned no qualifying items; skipping cleanup");
            CleanupReport::Skipped {
                reason: CleanupSkipReason::EmptySource,
            }
        } else {
            match RetainedTickets::new(retained) {
                Some(retained) => self.cleanup(&retained, &rendered_keys).await,
                None => {
                    tracing::warn!(
                        found = items.len(),
                        "no work item can anchor a deletion set; skipping cleanup"
                    );
                    CleanupReport::Skipped {
                        reason: CleanupSkipReason::NoValidItems,
                    }
                }
            }
        };

        let count = |f: fn(&ItemOutcome) -> bool| outcomes.iter().filter(|o| f(o)).count();
        let summary = CycleSummary {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            found: items.len(),
            processed: count(|o| matches!(o, ItemOutcome::Synced { .. })),
            skipped: count(|o| matches!(o, ItemOutcome::Skipped { .. })),
            failed: count(|o| matches!(o, ItemOutcome::Partial { .. })),
            cleanup,
            items: outcomes,
        };
        tracing::info!(
            found = summary.found,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            cleanup = ?summary.cleanup,
            "reconciliation cycle finished"
        );
        Ok(summary)
    }

    /// Sync one item. Also returns the artifact key rendered for it, if any.
    #[tracing::instrument(level = "debug", skip(self, item), fields(ticket = %item.ticket))]
    async fn sync_item(&self, item: &WorkItem) -> Result<(ItemOutcome, Option<String>)> {
        let record = match self.extractor.extract(item).await? {
            Ok(record) => record,
            Err(e) => {
                tracing::info!(ticket = %item.ticket, error = %e, "skipping work item");
                let skipped = ItemOutcome::Skipped {
                    ticket: item.ticket.clone(),
                    reason: e.to_string(),
                };
                return Ok((skipped, None));
            }
        };

        let mut failures = Vec::new();
        let mut fail = |step: SyncStep, e: crate::Error| {
            tracing::error!(ticket = %record.ticket, part_name = %record.name, ?step, error = %e, "sync step failed");
            failures.push(StepFailure {
                step,
                message: e.to_string(),
            });
        };

        let design = item.design_attachment().map(|attachment| {
            let key = ArtifactKey::new(&self.artifact_prefix, &record.name, &attachment.filename)
                .to_string();
            (attachment, key)
        });
        let artifact = match &design {
            None => {
                tracing::debug!(ticket = %record.ticket, "no design attachment");
                None
            }
            Some((attachment, key)) => match self.store_artifact(&record, attachment, key).await {
                Ok(put) => Some(put),
                Err(e) => {
                    fail(SyncStep::Artifact, e);
                    None
                }
            },
        };

        let category = match self
            .relational
            .upsert_category(&record.material, record.thickness)
            .await
        {
            Ok(outcome) => Some(outcome.into_row()),
            Err(e) => {
                fail(SyncStep::Category, e);
                None
            }
        };

        let part = match category {
            Some(category) => match self
                .relational
                .upsert_part(&NewPart::from_record(&record, category.id))
                .await
            {
                Ok(outcome) => {
                    if !outcome.is_created() && outcome.row().ticket != record.ticket {
                        tracing::warn!(
                            ticket = %record.ticket,
                            part_name = %record.name,
                            existing_ticket = %outcome.row().ticket,
                            "part name already taken by another ticket"
                        );
                    }
                    Some(outcome.into_row())
                }
                Err(e) => {
                    fail(SyncStep::Part, e);
                    None
                }
            },
            None => None,
        };

        let outcome = match part {
            Some(part) if failures.is_empty() => ItemOutcome::Synced {
                ticket: record.ticket,
                artifact,
                part,
            },
            _ => ItemOutcome::Partial {
                ticket: record.ticket,
                failures,
            },
        };
        Ok((outcome, design.map(|(_, key)| key)))
    }

    /// Store the design attachment unless it is already there.
    #[tracing::instrument(level = "debug", skip_all, fields(ticket = %record.ticket, key = %key))]
    async fn store_artifact(
        &self,
        record: &PartRecord,
        attachment: &Attachment,
        key: &str,
    ) -> Result<ArtifactPut> {
        if self.artifacts.exists(key).await? {
            return Ok(ArtifactPut::AlreadyPresent);
        }
        let body = self.source.fetch_attachment(attachment).await?;
        let put = self.artifacts.put_if_absent(key, body).await?;
        tracing::info!(ticket = %record.ticket, key = %key, ?put, "stored design artifact");
        Ok(put)
    }

    /// Delete rows and artifacts whose work item no longer qualifies.
    ///
    /// Each step runs even if an earlier one failed.
    #[tracing::instrument(level = "info", skip_all, fields(retained = retained.len()))]
    async fn cleanup(
        &self,
        retained: &RetainedTickets,
        rendered_keys: &BTreeSet<String>,
    ) -> CleanupReport {
        let mut errors = 0u64;

        let parts_deleted = match self.relational.delete_parts_not_in(retained).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "part cleanup failed");
                errors += 1;
                0
            }
        };

        let categories_deleted = match self.relational.delete_orphan_categories().await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "category cleanup failed");
                errors += 1;
                0
            }
        };

        let artifacts_deleted = self.cleanup_artifacts(rendered_keys, &mut errors).await;

        CleanupReport::Applied {
            parts_deleted,
            categories_deleted,
            artifacts_deleted,
            errors,
        }
    }

    /// An artifact is live when this cycle rendered its key, or when the part
    /// named by its last-`-` parse still exists.
    async fn cleanup_artifacts(
        &self,
        rendered_keys: &BTreeSet<String>,
        errors: &mut u64,
    ) -> u64 {
        let prefix = ArtifactKey::listing_prefix(&self.artifact_prefix);
        let keys = match self.artifacts.list_keys(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(error = %e, "artifact listing failed");
                *errors += 1;
                return 0;
            }
        };

        let mut deleted = 0u64;
        for key in keys {
            if rendered_keys.contains(&key) {
                continue;
            }
            let Some(parsed) = ArtifactKey::parse(&self.artifact_prefix, &key) else {
                tracing::debug!(key = %key, "ignoring unparseable artifact key");
                continue;
            };
            match self.relational.find_part_by_name(parsed.part_name()).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(key = %key, part_name = %parsed.part_name(), error = %e, "part lookup failed; keeping artifact");
                    *errors += 1;
                    continue;
                }
            }
            match self.artifacts.delete(&key).await {
                Ok(()) => {
                    tracing::info!(key = %key, "deleted stale artifact");
                    deleted += 1;
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "artifact delete failed");
                    *errors += 1;
                }
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{InMemoryArtifactStore, InMemoryRelationalStore, InMemorySource};

    struct Harness {
        source: Arc<InMemorySource>,
        artifacts: Arc<InMemoryArtifactStore>,
        relational: Arc<InMemoryRelationalStore>,
        engine: ReconciliationEngine,
    }

    fn harness() -> Harness {
        let source = Arc::new(InMemorySource::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let relational = Arc::new(InMemoryRelationalStore::new());
        let engine = ReconciliationEngine::new(
            source.clone(),
            artifacts.clone(),
            relational.clone(),
        );
        Harness {
            source,
            artifacts,
            relational,
            engine,
        }
    }

    fn item(ticket: &str, name: &str, filename: &str) -> WorkItem {
        WorkItem {
            summary: Some(name.to_string()),
            epic_ref: Some("HW-100".to_string()),
            quantity: Some("1".to_string()),
            material: Some("AL".to_string()),
            thickness: Some("0.25".to_string()),
            attachments: vec![Attachment {
                id: format!("{ticket}-att"),
                filename: filename.to_string(),
                content_url: format!("https://tracker/{ticket}/{filename}"),
                size: None,
            }],
            ..WorkItem::new(ticket)
        }
    }

    async fn seed(h: &Harness, items: Vec<WorkItem>) {
        h.source.set_epic("HW-100", "E1").await;
        for item in &items {
            for att in &item.attachments {
                h.source.set_attachment_body(&att.content_url, "STEP").await;
            }
        }
        h.source.set_items(items).await;
    }

    #[tokio::test]
    async fn existing_artifact_is_not_downloaded_again() {
        let h = harness();
        seed(&h, vec![item("HW-1", "Bracket", "bracket.step")]).await;

        h.engine.run_cycle().await.expect("first cycle");
        h.engine.run_cycle().await.expect("second cycle");

        assert_eq!(h.source.fetch_calls(), 1);
        assert_eq!(h.artifacts.keys().await, vec!["Valor-Bracket-bracket.step"]);
    }

    #[tokio::test]
    async fn listing_failure_aborts_before_any_write() {
        let h = harness();
        seed(&h, vec![item("HW-1", "Bracket", "bracket.step")]).await;
        h.engine.run_cycle().await.expect("seed cycle");

        h.source.fail_listing(true);
        assert!(h.engine.run_cycle().await.is_err());
        assert_eq!(h.relational.parts().await.len(), 1);
        assert_eq!(h.artifacts.keys().await.len(), 1);
    }

    #[tokio::test]
    async fn category_failure_skips_part_and_keeps_ticket_retained() {
        let h = harness();
        seed(
            &h,
            vec![
                item("HW-1", "Bracket", "bracket.step"),
                item("HW-2", "Plate", "plate.step"),
            ],
        )
        .await;
        h.engine.run_cycle().await.expect("seed cycle");

        h.relational.fail_category_writes(true);
        let mut steel = item("HW-3", "Gusset", "gusset.step");
        steel.material = Some("ST".to_string());
        h.source
            .set_items(vec![item("HW-1", "Bracket", "bracket.step"), steel])
            .await;
        h.source
            .set_attachment_body("https://tracker/HW-3/gusset.step", "STEP")
            .await;
        let summary = h.engine.run_cycle().await.expect("cycle");

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        let partial = summary
            .items
            .iter()
            .find(|o| o.ticket() == &Ticket::from("HW-3"))
            .expect("HW-3 outcome");
        match partial {
            ItemOutcome::Partial { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].step, SyncStep::Category);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        // Artifact step is independent of relational success.
        assert!(
            h.artifacts
                .keys()
                .await
                .contains(&"Valor-Gusset-gusset.step".to_string())
        );
        let names: Vec<String> = h.relational.parts().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Bracket"]);
    }

    #[tokio::test]
    async fn artifact_failure_does_not_block_relational_writes() {
        let h = harness();
        seed(&h, vec![item("HW-1", "Bracket", "bracket.step")]).await;
        h.artifacts.fail_writes(true);

        let summary = h.engine.run_cycle().await.expect("cycle");
        assert_eq!(summary.failed, 1);
        assert_eq!(h.relational.parts().await.len(), 1);
        assert!(h.artifacts.keys().await.is_empty());
    }

    #[tokio::test]
    async fn part_failure_keeps_ticket_and_reaps_new_category() {
        let h = harness();
        seed(&h, vec![item("HW-1", "Bracket", "bracket.step")]).await;
        h.engine.run_cycle().await.expect("seed cycle");

        h.relational.fail_part_writes(true);
        let mut steel = item("HW-3", "Gusset", "gusset.step");
        steel.material = Some("ST".to_string());
        h.source
            .set_items(vec![item("HW-1", "Bracket", "bracket.step"), steel])
            .await;
        h.source
            .set_attachment_body("https://tracker/HW-3/gusset.step", "STEP")
            .await;
        let summary = h.engine.run_cycle().await.expect("cycle");

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.failed, 1);
        let partial = summary
            .items
            .iter()
            .find(|o| o.ticket() == &Ticket::from("HW-3"))
            .expect("HW-3 outcome");
        assert!(partial.is_retained());
        match partial {
            ItemOutcome::Partial { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].step, SyncStep::Part);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        // The ST category was created this cycle but nothing references it.
        assert_eq!(
            summary.cleanup,
            CleanupReport::Applied {
                parts_deleted: 0,
                categories_deleted: 1,
                artifacts_deleted: 0,
                errors: 0
            }
        );
        let materials: Vec<String> = h
            .relational
            .categories()
            .await
            .into_iter()
            .map(|c| c.material)
            .collect();
        assert_eq!(materials, vec!["AL"]);
        assert_eq!(
            h.artifacts.keys().await,
            vec!["Valor-Bracket-bracket.step", "Valor-Gusset-gusset.step"]
        );
    }

    #[tokio::test]
    async fn tracker_error_during_epic_lookup_aborts_before_cleanup() {
        let h = harness();
        seed(
            &h,
            vec![
                item("HW-1", "Bracket", "bracket.step"),
                item("HW-2", "Plate", "plate.step"),
            ],
        )
        .await;
        h.engine.run_cycle().await.expect("seed cycle");

        h.source
            .set_items(vec![item("HW-2", "Plate", "plate.step")])
            .await;
        h.source.fail_epic_lookups(true);
        let err = h.engine.run_cycle().await.expect_err("cycle aborts");

        assert!(matches!(err, crate::Error::Unauthorized(_)));
        assert_eq!(h.relational.parts().await.len(), 2);
        assert_eq!(h.artifacts.keys().await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_epic_is_skipped_and_reaped() {
        let h = harness();
        seed(
            &h,
            vec![
                item("HW-1", "Bracket", "bracket.step"),
                item("HW-2", "Plate", "plate.step"),
            ],
        )
        .await;
        h.engine.run_cycle().await.expect("seed cycle");

        let mut dangling_epic = item("HW-1", "Bracket", "bracket.step");
        dangling_epic.epic_ref = Some("HW-404".to_string());
        h.source
            .set_items(vec![dangling_epic, item("HW-2", "Plate", "plate.step")])
            .await;
        let summary = h.engine.run_cycle().await.expect("cycle");

        assert_eq!(summary.skipped, 1);
        let names: Vec<String> = h.relational.parts().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Plate"]);
        assert_eq!(h.artifacts.keys().await, vec!["Valor-Plate-plate.step"]);
    }

    #[tokio::test]
    async fn only_invalid_items_skip_cleanup() {
        let h = harness();
        seed(&h, vec![item("HW-1", "Bracket", "bracket.step")]).await;
        h.engine.run_cycle().await.expect("seed cycle");

        let mut incomplete = item("HW-2", "Plate", "plate.step");
        incomplete.material = None;
        h.source.set_items(vec![incomplete]).await;
        let summary = h.engine.run_cycle().await.expect("cycle");

        assert_eq!(
            summary.cleanup,
            CleanupReport::Skipped {
                reason: CleanupSkipReason::NoValidItems
            }
        );
        assert_eq!(h.relational.parts().await.len(), 1);
    }

    #[tokio::test]
    async fn hyphenated_attachment_lives_while_its_item_does() {
        let h = harness();
        seed(
            &h,
            vec![
                item("HW-1", "Bracket", "bracket-v2.step"),
                item("HW-2", "Plate", "plate.step"),
            ],
        )
        .await;

        h.engine.run_cycle().await.expect("first cycle");
        let summary = h.engine.run_cycle().await.expect("second cycle");
        assert_eq!(
            h.artifacts.keys().await,
            vec!["Valor-Bracket-bracket-v2.step", "Valor-Plate-plate.step"]
        );
        assert!(matches!(
            summary.cleanup,
            CleanupReport::Applied {
                artifacts_deleted: 0,
                errors: 0,
                ..
            }
        ));

        h.source
            .set_items(vec![item("HW-2", "Plate", "plate.step")])
            .await;
        h.engine.run_cycle().await.expect("third cycle");
        assert_eq!(h.artifacts.keys().await, vec!["Valor-Plate-plate.step"]);
    }

    #[tokio::test]
    async fn artifact_of_removed_part_is_deleted_despite_live_prefix() {
        let h = harness();
        seed(
            &h,
            vec![
                item("HW-1", "Bracket", "bracket.step"),
                item("HW-2", "Bracket-Left", "left.step"),
            ],
        )
        .await;
        h.engine.run_cycle().await.expect("first cycle");
        assert_eq!(h.artifacts.keys().await.len(), 2);

        h.source
            .set_items(vec![item("HW-1", "Bracket", "bracket.step")])
            .await;
        let summary = h.engine.run_cycle().await.expect("second cycle");

        let names: Vec<String> = h.relational.parts().await.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Bracket"]);
        assert_eq!(h.artifacts.keys().await, vec!["Valor-Bracket-bracket.step"]);
        assert_eq!(
            summary.cleanup,
            CleanupReport::Applied {
                parts_deleted: 1,
                categories_deleted: 0,
                artifacts_deleted: 1,
                errors: 0
            }
        );
    }

    #[tokio::test]
    async fn foreign_and_unparseable_keys_are_left_alone() {
        let h = harness();
        seed(&h, vec![item("HW-1", "Bracket", "bracket.step")]).await;
        h.artifacts.insert("Other-Thing-thing.step", "x").await;
        h.artifacts.insert("Valor-orphan.step", "x").await;
        h.artifacts.insert("Valor-Gone-gone.step", "x").await;

        h.engine.run_cycle().await.expect("cycle");

        assert_eq!(
            h.artifacts.keys().await,
            vec![
                "Other-Thing-thing.step",
                "Valor-Bracket-bracket.step",
                "Valor-orphan.step"
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_items_converge_to_unique_rows() {
        let source = Arc::new(InMemorySource::new());
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let relational = Arc::new(InMemoryRelationalStore::new());
        let engine =
            ReconciliationEngine::new(source.clone(), artifacts.clone(), relational.clone())
                .with_item_concurrency(4);
        let h = Harness {
            source,
            artifacts,
            relational,
            engine,
        };
        seed(
            &h,
            (1..=8)
                .map(|n| item(&format!("HW-{n}"), &format!("Part{n}"), "part.step"))
                .collect(),
        )
        .await;

        let summary = h.engine.run_cycle().await.expect("cycle");
        assert_eq!(summary.processed, 8);
        assert_eq!(h.relational.categories().await.len(), 1);
        assert_eq!(h.relational.parts().await.len(), 8);
        assert_eq!(h.artifacts.keys().await.len(), 8);
    }
}
