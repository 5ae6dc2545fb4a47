//! `cleanflow` -- command line client for the batch cleaning server.
//!
//! Uploads source files, follows batch progress, issues lifecycle
//! commands, browses records and drives single-record corrections.
//!
//! # Environment variables
//!
//! | Variable                         | Required | Default                     | Description                       |
//! |----------------------------------|----------|-----------------------------|-----------------------------------|
//! | `CLEANFLOW_API_URL`              | no       | `http://localhost:8080/api` | REST base URL                     |
//! | `CLEANFLOW_STREAM_URL`           | no       | API URL                     | Progress stream base (`ws://` selects WebSocket) |
//! | `CLEANFLOW_TOKEN`                | no       | --                          | Bearer token                      |
//! | `CLEANFLOW_REQUEST_TIMEOUT_SECS` | no       | `30`                        | REST request timeout              |
//! | `CLEANFLOW_RECONNECT_DELAY_SECS` | no       | `3`                         | Delay before a stream reconnect   |
//! | `CLEANFLOW_LOG_FORMAT`           | no       | `text`                      | `json` for structured logs        |

use std::path::Path;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use cleanflow_client::correction::{CommitOutcome, Confirmation, RecordCorrectionEngine, ValidateOutcome};
use cleanflow_client::events::InvalidationBus;
use cleanflow_client::history::VersionHistoryStore;
use cleanflow_client::lifecycle::BatchLifecycleController;
use cleanflow_client::stream::{CloseReason, ProgressStreamClient, SubscriptionEvent};
use cleanflow_client::upload::UploadTransport;
use cleanflow_client::{CleanflowApi, ClientConfig};
use cleanflow_core::record::{RecordPatch, RecordQuery};
use cleanflow_core::rules::{default_rules, parse_rules};
use cleanflow_core::types::DbId;
use commands::Commands;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "cleanflow", version, about = "Client for server-side batch data cleaning")]
struct Cli {
    /// Overrides `CLEANFLOW_API_URL`
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let mut config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    if let Some(api_url) = cli.api_url {
        let stream_follows_api = config.stream_url == config.api_url;
        let token = config.token.take();
        let mut overridden = ClientConfig::new(api_url);
        overridden.token = token;
        overridden.request_timeout = config.request_timeout;
        overridden.reconnect_delay = config.reconnect_delay;
        if !stream_follows_api {
            overridden.stream_url = config.stream_url;
        }
        config = overridden;
    }

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cleanflow_cli=info,cleanflow_client=info".into());
    let json = std::env::var("CLEANFLOW_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(command: Commands, config: &ClientConfig) -> anyhow::Result<()> {
    let api = CleanflowApi::from_config(config)?;

    match command {
        Commands::Upload { path, rules, watch } => {
            let batch_id = upload(&api, &path, rules.as_deref()).await?;
            if watch {
                follow(&api, config, batch_id).await?;
            }
        }
        Commands::Watch { batch_id } => follow(&api, config, batch_id).await?,
        Commands::Pause { batch_id } => {
            lifecycle(&api, batch_id).await?.pause().await?;
            println!("Pause requested for batch #{batch_id}");
        }
        Commands::Resume { batch_id } => {
            lifecycle(&api, batch_id).await?.resume().await?;
            println!("Resume requested for batch #{batch_id}");
        }
        Commands::Cancel { batch_id } => {
            lifecycle(&api, batch_id).await?.cancel().await?;
            println!("Cancel requested for batch #{batch_id}; watch the batch to confirm");
        }
        Commands::Batches => {
            for batch in api.list_batches().await? {
                output::print_batch(&batch);
            }
        }
        Commands::Show { batch_id } => output::print_batch(&api.get_batch(batch_id).await?),
        Commands::Rename { batch_id, name } => {
            api.rename_batch(batch_id, &name).await?;
            println!("Renamed batch #{batch_id}");
        }
        Commands::Records {
            batch_id,
            page,
            page_size,
            filter,
            search,
        } => {
            let query = RecordQuery {
                page,
                page_size,
                filter,
                search,
            }
            .normalized();
            output::print_page(&api.list_records(batch_id, &query).await?);
        }
        Commands::History { record_id } => {
            let store = VersionHistoryStore::new(api, &InvalidationBus::default());
            output::print_history(&store.list(record_id).await?);
        }
        Commands::Edit {
            batch,
            record_id,
            sets,
            reason,
            yes,
        } => edit(api, batch, record_id, &sets, &reason, yes).await?,
        Commands::Rollback {
            batch,
            record_id,
            version_id,
        } => {
            let bus = InvalidationBus::default();
            let history = VersionHistoryStore::new(api.clone(), &bus);
            match history.rollback_kind(record_id, version_id).await? {
                Some(kind) => println!("Expected: {}", kind.reason(version_id)),
                None => bail!("Version #{version_id} is not in the history of record #{record_id}"),
            }
            let engine = RecordCorrectionEngine::new(api, bus, batch);
            let record = engine.rollback(record_id, version_id).await?;
            output::print_record(&record);
        }
        Commands::Reason { version_id, reason } => {
            let store = VersionHistoryStore::new(api, &InvalidationBus::default());
            store.update_reason(version_id, &reason).await?;
            println!("Updated reason of version #{version_id}");
        }
        Commands::ExportUrl { batch_id, kind } => println!("{}", api.export_url(batch_id, kind.into())),
    }

    Ok(())
}

async fn upload(api: &CleanflowApi, path: &Path, rules: Option<&Path>) -> anyhow::Result<DbId> {
    let rules = match rules {
        Some(file) => {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("Failed to read rules from {}", file.display()))?;
            parse_rules(&text)?
        }
        None => default_rules(),
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            output::print_upload_event(&event);
        }
    });

    let result = UploadTransport::new(api.clone())
        .upload_path(path, &rules, Some(&tx))
        .await;
    drop(tx);
    printer.await?;

    Ok(result?)
}

async fn lifecycle(api: &CleanflowApi, batch_id: DbId) -> anyhow::Result<BatchLifecycleController> {
    let batch = api.get_batch(batch_id).await?;
    Ok(BatchLifecycleController::from_batch(api.clone(), &batch))
}

/// Print progress until the batch finishes, the stream is lost or the user
/// interrupts.
async fn follow(api: &CleanflowApi, config: &ClientConfig, batch_id: DbId) -> anyhow::Result<()> {
    let controller = lifecycle(api, batch_id).await?;
    if controller.state().is_terminal() {
        println!("Batch #{batch_id} is already {}", controller.status());
        return Ok(());
    }

    let client = ProgressStreamClient::from_config(config)?;
    let mut subscription = client.subscribe(batch_id);

    loop {
        let event = tokio::select! {
            event = subscription.next() => event,
            _ = tokio::signal::ctrl_c() => {
                println!("Stopped watching batch #{batch_id}");
                break;
            }
        };

        match event {
            Some(SubscriptionEvent::Snapshot(snapshot)) => {
                controller.apply_snapshot(&snapshot);
                output::print_snapshot(&snapshot);
            }
            Some(SubscriptionEvent::Reconnecting { delay }) => {
                println!("Connection lost, reconnecting in {}s", delay.as_secs());
            }
            Some(SubscriptionEvent::Warning(message)) => eprintln!("warning: {message}"),
            Some(SubscriptionEvent::Closed(CloseReason::Terminal(status))) => {
                let state = controller.state();
                println!(
                    "Batch #{batch_id} {status}: {} ok, {} failed",
                    state.success_count, state.failure_count
                );
                break;
            }
            Some(SubscriptionEvent::Closed(CloseReason::ReconnectFailed)) | None => {
                let state = controller.refresh().await?;
                println!("Stream closed; batch #{batch_id} is {}", state.status);
                break;
            }
        }
    }

    subscription.close().await;
    Ok(())
}

async fn edit(
    api: CleanflowApi,
    batch_id: DbId,
    record_id: DbId,
    sets: &[String],
    reason: &str,
    yes: bool,
) -> anyhow::Result<()> {
    let mut patch = RecordPatch::default();
    for assignment in sets {
        let Some((field, value)) = assignment.split_once('=') else {
            bail!("Expected FIELD=VALUE, got '{assignment}'");
        };
        patch.set(field.trim(), value)?;
    }

    let engine = RecordCorrectionEngine::new(api, InvalidationBus::default(), batch_id);
    engine.begin_session(record_id);

    let ticket = match engine.validate(record_id, patch.clone()).await? {
        ValidateOutcome::NoChanges(_) => {
            println!("No changes to commit");
            return Ok(());
        }
        ValidateOutcome::NeedsConfirmation(ticket) => ticket,
    };
    output::print_validation(ticket.result());

    if !yes && !confirm("Commit this change?").await? {
        engine.discard(record_id);
        println!("Discarded");
        return Ok(());
    }

    match engine
        .commit(record_id, patch, reason, Confirmation::Ticket(ticket))
        .await?
    {
        CommitOutcome::Committed(record) => output::print_record(&record),
        CommitOutcome::NoChanges => println!("Server reported no changes"),
    }
    Ok(())
}

async fn confirm(question: &str) -> anyhow::Result<bool> {
    println!("{question} [y/N]");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}
