use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use signage::config::{ConfigStore, DEFAULT_CONFIG_PATH};
use signage::logging;
use signage::markers::InboxMarkers;
use signage::overview::Overview;
use signage::pipeline::PublishPipeline;
use signage::platform::viewer::RestartCommand;
use signage::state::FileStateStore;
use signage::status::StatusReporter;
use signage::tasks;

#[derive(Debug, Parser)]
#[command(
    name = "signage",
    version,
    about = "Drop-folder signage: inbox watcher, publish pipeline and display schedule"
)]
struct Args {
    /// Path to the key = value config file
    #[arg(
        long,
        short = 'c',
        value_name = "FILE",
        default_value = DEFAULT_CONFIG_PATH,
        global = true
    )]
    config: PathBuf,
    /// Raise log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Recover, then run every loop until SIGINT/SIGTERM
    Daemon,
    /// Recover, then watch the inbox and publish each settled batch
    Inbox,
    /// Watch the live directory and restart the viewer on manual changes
    Live,
    /// Refresh STATUS_* progress files while a run is active
    Status,
    /// Apply the weekly schedule to mode and display power
    Schedule,
    /// Recover, then run the pipeline once
    Publish,
    /// Rename a stale PROCESSING marker and purge scratch directories
    Recover,
    /// Print run state, persisted mode/power and upcoming transitions
    Show {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loop {
    Inbox,
    Live,
    Status,
    Schedule,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let Args {
        config,
        verbose,
        command,
    } = Args::parse();
    logging::init(verbose);

    let config = ConfigStore::open(&config)?;
    match command {
        Command::Daemon => {
            run_loops(config, &[Loop::Inbox, Loop::Live, Loop::Status, Loop::Schedule]).await?
        }
        Command::Inbox => run_loops(config, &[Loop::Inbox]).await?,
        Command::Live => run_loops(config, &[Loop::Live]).await?,
        Command::Status => run_loops(config, &[Loop::Status]).await?,
        Command::Schedule => run_loops(config, &[Loop::Schedule]).await?,
        Command::Publish => return publish_once(config).await,
        Command::Recover => {
            let pipeline = PublishPipeline::from_settings(config.current());
            let report = tokio::task::spawn_blocking(move || pipeline.recover())
                .await
                .context("recovery task panicked")??;
            info!(marker = ?report.marker, purged = report.purged.len(), "recovery complete");
        }
        Command::Show { json } => show(&config, json)?,
    }
    Ok(ExitCode::SUCCESS)
}

async fn publish_once(config: ConfigStore) -> Result<ExitCode> {
    let pipeline = PublishPipeline::from_settings(config.current());
    let outcome = tokio::task::spawn_blocking(move || {
        pipeline.recover()?;
        pipeline.run()
    })
    .await
    .context("conversion task panicked")?;
    match outcome {
        Ok(report) => {
            println!("{}", report.summary());
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!(error = %err, "conversion run failed");
            Ok(ExitCode::from(1))
        }
    }
}

fn show(config: &ConfigStore, json: bool) -> Result<()> {
    let settings = config.current();
    let markers = InboxMarkers::new(settings.inbox_dir.clone());
    let state = FileStateStore::from_settings(&settings);
    let overview = Overview::collect(&settings, &markers, &state, settings.local_now())
        .context("failed to read appliance state")?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&overview).context("failed to encode overview")?
        );
    } else {
        print!("{}", overview.render_text());
    }
    Ok(())
}

async fn run_loops(config: ConfigStore, loops: &[Loop]) -> Result<()> {
    let settings = config.current();
    let cancel = CancellationToken::new();
    spawn_shutdown_listeners(&cancel);

    let mut tasks = JoinSet::new();

    if loops.contains(&Loop::Inbox) {
        let pipeline = Arc::new(PublishPipeline::from_settings(Arc::clone(&settings)));
        let recovery = {
            let pipeline = Arc::clone(&pipeline);
            tokio::task::spawn_blocking(move || pipeline.recover())
                .await
                .context("recovery task panicked")?
        };
        if let Err(err) = recovery {
            warn!(error = %err, "crash recovery incomplete");
        }
        tasks.spawn({
            let settings = Arc::clone(&settings);
            let cancel = cancel.clone();
            async move {
                tasks::inbox::run(settings, pipeline, cancel)
                    .await
                    .context("inbox watcher failed")
            }
        });
    }

    if loops.contains(&Loop::Live) {
        tasks.spawn({
            let settings = Arc::clone(&settings);
            let state = Arc::new(FileStateStore::from_settings(&settings));
            let viewer = Arc::new(RestartCommand::new(settings.restart_command.clone()));
            let cancel = cancel.clone();
            async move {
                tasks::live::run(settings, state, viewer, cancel)
                    .await
                    .context("live watcher failed")
            }
        });
    }

    if loops.contains(&Loop::Status) {
        tasks.spawn({
            let settings = Arc::clone(&settings);
            let reporter = StatusReporter::from_settings(&settings);
            let cancel = cancel.clone();
            async move {
                tasks::status::run(settings, reporter, cancel)
                    .await
                    .context("status reporter failed")
            }
        });
    }

    if loops.contains(&Loop::Schedule) {
        tasks.spawn({
            let cancel = cancel.clone();
            async move {
                tasks::schedule::run(config, cancel)
                    .await
                    .context("schedule loop failed")
            }
        });
    }

    let mut failure = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|err| anyhow!("task panicked: {err}")).and_then(|r| r);
        if let Err(err) = result {
            error!("{err:#}");
            cancel.cancel();
            failure.get_or_insert(err);
        }
    }
    info!("all loops stopped");
    failure.map_or(Ok(()), Err)
}

fn spawn_shutdown_listeners(cancel: &CancellationToken) {
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!("ctrl-c handler failed: {err}");
                return;
            }
            info!("ctrl-c received; shutting down");
            cancel.cancel();
        });
    }

    #[cfg(unix)]
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sigterm.recv() => {
                            info!("SIGTERM received; shutting down");
                            cancel.cancel();
                        }
                    }
                }
                Err(err) => warn!("failed to register SIGTERM handler: {err}"),
            }
        });
    }
}
