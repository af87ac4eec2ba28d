//! `idsr-sync`: field device sync agent.
//!
//! Usage:
//!   idsr-sync run                 run the background worker until Ctrl-C
//!   idsr-sync once                run one sync pass and print the summary
//!   idsr-sync stage <draft.json>  stage a case report draft
//!   idsr-sync status              staged report counts by state
//!   idsr-sync retry <local-id>    re-queue a failed report
//!   idsr-sync clusters            list outbreak cluster candidates

use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;

use idsr_alerts::OutbreakClusterDetector;
use idsr_core::{CaseReport, CaseReportDraft, ClientLocalId, SyncState};
use idsr_field::remote::RestRemoteStore;
use idsr_field::{
    Connectivity, FieldConfig, SqliteStagingStore, StagingStore, SyncCoordinator, SyncEvent, SyncWorker,
    fetch_cluster_candidates,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = FieldConfig::from_env()?;
    idsr_observability::init_with(cfg.log_format);

    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "run".to_string());

    let staging = SqliteStagingStore::open(&cfg.staging_db)
        .await
        .with_context(|| format!("failed to open staging store at {}", cfg.staging_db.display()))?;

    let mut remote = RestRemoteStore::new(cfg.remote_url.clone(), cfg.remote_timeout)
        .context("failed to build remote client")?;
    if let Some(key) = &cfg.remote_api_key {
        remote = remote.with_api_key(key.clone());
    }

    let coordinator = Arc::new(
        SyncCoordinator::new(Arc::new(staging), Arc::new(remote))
            .with_remote_timeout(cfg.remote_timeout),
    );

    match command.as_str() {
        "run" => run(coordinator, &cfg).await,
        "once" => {
            let summary = coordinator.sync_pending().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        "stage" => {
            let path = args.next().context("usage: idsr-sync stage <draft.json>")?;
            let raw = std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
            let draft: CaseReportDraft = serde_json::from_str(&raw).context("invalid draft")?;
            let report = CaseReport::from_draft(draft, cfg.require_reporter()?, Utc::now())?;
            let staged = coordinator.stage(report).await?;
            println!("{}", staged.local_id());
            Ok(())
        }
        "status" => {
            for state in [
                SyncState::Pending,
                SyncState::Syncing,
                SyncState::Synced,
                SyncState::Failed,
            ] {
                let count = coordinator.staging().list_by_state(state).await?.len();
                println!("{state}: {count}");
            }
            Ok(())
        }
        "retry" => {
            let id = args.next().context("usage: idsr-sync retry <local-id>")?;
            let staged = coordinator.retry(&ClientLocalId::new(id)?).await?;
            println!("{} -> {}", staged.local_id(), staged.sync_state);
            Ok(())
        }
        "clusters" => {
            let detector = OutbreakClusterDetector::default();
            let candidates =
                fetch_cluster_candidates(coordinator.remote().as_ref(), &detector, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&candidates)?);
            Ok(())
        }
        other => bail!("unknown command '{other}'"),
    }
}

async fn run(coordinator: Arc<SyncCoordinator>, cfg: &FieldConfig) -> anyhow::Result<()> {
    let connectivity = Connectivity::default();
    let worker = SyncWorker::new(coordinator, connectivity).with_interval(cfg.sync_interval);
    let mut events = worker.subscribe();
    let handle = worker.start();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                tracing::info!("shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(SyncEvent::Completed { summary, .. }) if summary.failed > 0 => {
                    tracing::warn!(failed = summary.failed, "some reports could not be delivered");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "sync event receiver lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}
