use autocam_core::config::{AppConfig, PostgresConfig};
use autocam_core::store::postgres::PostgresRelationalStore;
use autocam_daemon::cli::{Cli, Commands};
use autocam_daemon::wiring;
use clap::Parser;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // JSON stdout logs unless AUTOCAM_LOG_FORMAT=pretty.
    autocam_core::o11y::init_global_from_env()?;
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let cfg = AppConfig::from_env()?;
            let scheduler = wiring::build_scheduler(&cfg).await?;

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::warn!(%e, "failed to listen for ctrl-c");
                        return;
                    }
                    tracing::info!("shutdown requested; finishing current cycle");
                    cancel.cancel();
                }
            });

            scheduler.run(cancel).await;
        }
        Commands::Once => {
            let cfg = AppConfig::from_env()?;
            let scheduler = wiring::build_scheduler(&cfg).await?;
            let summary = scheduler.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Migrate => {
            let cfg = PostgresConfig::from_env()?;
            let store = PostgresRelationalStore::connect(&cfg).await?;
            store.migrate().await?;
            tracing::info!("part sync schema applied");
        }
        Commands::Config => {
            let cfg = AppConfig::from_env()?;
            println!("{}", serde_json::to_string_pretty(&wiring::redacted_config(&cfg))?);
        }
    }

    Ok(())
}
