//! Subcommand implementations.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use alumnet_db::DbPool;
use alumnet_invites::{
    AnomalyReviewer, CsvDelimiter, DispatchCoordinator, ExpirySweeper, HeuristicReviewer,
    IngestionService, InviteStore, LogMailer, NoopAccountLifecycle, PgInviteStore,
    RemoteAnomalyReviewer, SendAllSummary, UploadFormat,
};
use clap::Args;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{WorkerError, WorkerResult};

/// Shared handles built once per process.
pub struct Context {
    pub config: Config,
    pub store: Arc<PgInviteStore>,
}

impl Context {
    pub fn new(config: Config, pool: DbPool) -> Self {
        let store = Arc::new(PgInviteStore::new(pool, &config.invite));
        Self { config, store }
    }

    fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.store.clone(),
            Arc::new(NoopAccountLifecycle),
            &self.config.invite,
        )
    }

    fn reviewer(&self) -> WorkerResult<Arc<dyn AnomalyReviewer>> {
        Ok(match &self.config.reviewer_url {
            Some(url) => Arc::new(RemoteAnomalyReviewer::new(url.as_str())?),
            None => Arc::new(
                HeuristicReviewer::new()
                    .with_similarity_threshold(self.config.invite.similarity_threshold),
            ),
        })
    }
}

/// Run the expiry sweeper until Ctrl+C or SIGTERM.
pub async fn run(ctx: &Context) -> WorkerResult<()> {
    info!(
        interval_secs = ctx.config.invite.sweep_interval.as_secs(),
        "Starting expiry sweeper"
    );
    let report = ctx.sweeper().run_until(shutdown_signal()).await;
    info!(
        expired = report.expired.len(),
        hard_deleted = report.hard_deleted.len(),
        errors = report.errors,
        "Expiry sweeper stopped"
    );
    Ok(())
}

/// Run one sweep cycle and print its report.
pub async fn sweep(ctx: &Context) -> WorkerResult<()> {
    let report = ctx.sweeper().run_once().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Roster file (.csv, .tsv, .txt, .xlsx, .xls, .ods)
    pub file: PathBuf,

    /// Administrator recorded as the inviter
    #[arg(long)]
    pub invited_by: String,

    /// Domain every college email is expected to use
    #[arg(long)]
    pub expected_domain: Option<String>,

    /// Delimiter for text files; inferred from the extension when omitted
    #[arg(long, value_parser = CsvDelimiter::parse)]
    pub delimiter: Option<CsvDelimiter>,

    /// Row index whose default review decision should be flipped (repeatable)
    #[arg(
        long = "exclude-duplicates-override",
        visible_alias = "override",
        value_name = "ROW"
    )]
    pub overrides: Vec<u32>,

    /// Preview only; persist nothing
    #[arg(long, conflicts_with = "send")]
    pub dry_run: bool,

    /// Send the newly created invites after commit
    #[arg(long)]
    pub send: bool,
}

#[derive(Serialize)]
struct ImportReport {
    batch_id: Uuid,
    invalid: usize,
    warnings: usize,
    advisory: Option<String>,
    inserted: usize,
    skipped: Vec<u32>,
    excluded: Vec<u32>,
    failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    dispatch: Option<SendAllSummary>,
}

/// Ingest a roster file from disk.
pub async fn import(ctx: &Context, args: ImportArgs) -> WorkerResult<()> {
    let display = args.file.display().to_string();
    let data = tokio::fs::read(&args.file)
        .await
        .map_err(|source| WorkerError::Io {
            path: display.clone(),
            source,
        })?;

    let format = match args.delimiter {
        Some(delimiter) => UploadFormat::Delimited(delimiter),
        None => UploadFormat::from_file_name(&display)?,
    };

    let store: Arc<dyn InviteStore> = ctx.store.clone();
    let ingestion = IngestionService::new(store.clone(), ctx.reviewer()?, ctx.config.invite.clone());

    let preview = ingestion
        .preview(&data, format, args.expected_domain.as_deref())
        .await?;

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    let invalid = preview.invalid().len();
    let warnings = preview.warnings.len();
    let advisory = preview.advisory.clone();

    let overrides: BTreeSet<u32> = args.overrides.into_iter().collect();
    let outcome = ingestion
        .commit(preview, &overrides, &args.invited_by)
        .await?;

    let mut report = ImportReport {
        batch_id: outcome.batch_id,
        invalid,
        warnings,
        advisory,
        inserted: outcome.inserted.len(),
        skipped: outcome.skipped.clone(),
        excluded: outcome.excluded(),
        failed: outcome.failed.len(),
        dispatch: None,
    };

    if args.send && !outcome.inserted.is_empty() {
        let dispatch = DispatchCoordinator::new(
            store.clone(),
            Arc::new(LogMailer),
            ctx.config.invite.clone(),
        );
        let pending = store.list_sendable(Some(outcome.batch_id)).await?;
        report.dispatch = Some(dispatch.send_all(pending, &args.invited_by).await);
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
