use autocam_core::config::AppConfig;
use autocam_core::reconcile::engine::ReconciliationEngine;
use autocam_core::reconcile::schedule::Scheduler;
use autocam_core::store::postgres::PostgresRelationalStore;
use autocam_core::store::s3::S3ArtifactStore;
use autocam_core::Result;
use autocam_integrations::connectors::jira::JiraSourceClient;
use std::sync::Arc;

const REDACTED: &str = "***";

/// Connect every backend and assemble the scheduler.
#[tracing::instrument(level = "info", skip_all)]
pub async fn build_scheduler(cfg: &AppConfig) -> Result<Scheduler> {
    let source = Arc::new(JiraSourceClient::new(&cfg.jira)?);
    let artifacts = Arc::new(S3ArtifactStore::new(&cfg.s3).await?);
    let relational = Arc::new(PostgresRelationalStore::connect(&cfg.postgres).await?);

    let engine = ReconciliationEngine::new(source, artifacts, relational)
        .with_artifact_prefix(cfg.sync.artifact_prefix.clone())
        .with_item_concurrency(cfg.sync.item_concurrency);
    tracing::info!(
        bucket = %cfg.s3.bucket,
        interval_secs = cfg.sync.interval.as_secs(),
        item_concurrency = cfg.sync.item_concurrency,
        "reconciliation engine ready"
    );
    Scheduler::new(Arc::new(engine), cfg.sync.interval)
}

/// JSON view of the configuration with passwords and keys masked.
pub fn redacted_config(cfg: &AppConfig) -> serde_json::Value {
    let mask = |v: &Option<String>| v.as_ref().map(|_| REDACTED);
    serde_json::json!({
        "jira": {
            "server_url": cfg.jira.server_url,
            "username": cfg.jira.username,
            "password": REDACTED,
            "jql": cfg.jira.jql,
            "page_size": cfg.jira.page_size,
            "timeout_secs": cfg.jira.timeout.as_secs(),
            "fields": {
                "epic": cfg.jira.fields.epic,
                "quantity": cfg.jira.fields.quantity,
                "material": cfg.jira.fields.material,
                "thickness": cfg.jira.fields.thickness,
            },
        },
        "postgres": {
            "host": cfg.postgres.host,
            "port": cfg.postgres.port,
            "database": cfg.postgres.database,
            "user": cfg.postgres.user,
            "password": REDACTED,
            "max_connections": cfg.postgres.max_connections,
            "acquire_timeout_ms": cfg.postgres.acquire_timeout.as_millis() as u64,
        },
        "s3": {
            "bucket": cfg.s3.bucket,
            "region": cfg.s3.region,
            "endpoint": cfg.s3.endpoint,
            "access_key_id": mask(&cfg.s3.access_key_id),
            "secret_access_key": mask(&cfg.s3.secret_access_key),
        },
        "sync": {
            "interval_secs": cfg.sync.interval.as_secs(),
            "artifact_prefix": cfg.sync.artifact_prefix,
            "item_concurrency": cfg.sync.item_concurrency,
        },
    })
}
