pub mod certificate;
pub mod config;
pub mod confirm;
pub mod db;
pub mod models;
pub mod namespace;
pub mod registry;
pub mod sensing;
pub mod timer;
pub mod tracker;

use std::{collections::VecDeque, env, path::PathBuf, sync::Arc};

use anyhow::Result;
use log::{info, warn};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

pub use certificate::{decode_link, encode_link, Certificate};
pub use config::{FieldSpec, FieldType, TrackerConfig};
pub use confirm::{ChannelConfirmer, ConfirmPrompt, Confirmer, StaticConfirmer};
pub use db::{KeyValueStore, MemoryStore, SqliteStore};
pub use models::{FieldValue, StudentInfo, TrackedData, TrackingMode};
pub use registry::TrackerRegistry;
pub use timer::TrackerHandle;
pub use tracker::{SessionStore, TrackerObserver, TransitionOutcome};

use confirm::PendingConfirmation;
use sensing::SharedWindowMetrics;
use timer::commands::{dispatch, ConsoleObserver, HostCommand};

const DEFAULT_CONFIG_FILE: &str = "certtrack.json";
const DB_FILE: &str = "certtrack.sqlite3";

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Console host: one tracker fed by line commands on stdin, with tracker
/// events printed as JSON lines on stdout.
pub fn run() -> Result<()> {
    let debug_mode = env_flag("CERTTRACK_DEBUG");

    // Reads RUST_LOG when set
    env_logger::Builder::from_default_env()
        .filter_level(if debug_mode {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    info!("certtrack starting up...");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_host(debug_mode))
}

async fn run_host(debug_mode: bool) -> Result<()> {
    let config_path = env::var_os("CERTTRACK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = TrackerConfig::from_json_file(&config_path)?;
    config.debug |= debug_mode;

    let data_dir = env::var_os("CERTTRACK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&data_dir)?;

    let storage: Arc<dyn KeyValueStore> = match SqliteStore::new(data_dir.join(DB_FILE)) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            warn!("Falling back to in-memory storage: {err:#}");
            Arc::new(MemoryStore::new())
        }
    };

    let (confirmer, mut pending) = ChannelConfirmer::new();
    let metrics = Arc::new(SharedWindowMetrics::new());
    let store = SessionStore::new(config, storage).with_observer(Arc::new(ConsoleObserver));
    let handle = TrackerHandle::new(store, Arc::new(confirmer)).with_window_metrics(metrics.clone());

    let mut registry = TrackerRegistry::new();
    registry.register("main", handle.clone())?;

    let report = handle.start().await?;
    println!("{}", json!({ "event": "resumed", "payload": report }));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut waiting: VecDeque<PendingConfirmation> = VecDeque::new();

    loop {
        tokio::select! {
            Some(request) = pending.recv() => {
                println!("{}", json!({ "event": "confirm", "payload": request.prompt }));
                waiting.push_back(request);
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if !handle_line(&line, &handle, &metrics, &mut waiting).await {
                    break;
                }
            }
        }
    }

    info!("certtrack shutting down");
    registry.shutdown_all().await;
    Ok(())
}

/// Returns false once the user asks to quit.
async fn handle_line(
    line: &str,
    handle: &TrackerHandle,
    metrics: &SharedWindowMetrics,
    waiting: &mut VecDeque<PendingConfirmation>,
) -> bool {
    if line.trim().is_empty() {
        return true;
    }

    match line.parse::<HostCommand>() {
        Ok(HostCommand::Quit) => return false,
        Ok(HostCommand::Answer(confirmed)) => match waiting.pop_front() {
            Some(request) => request.answer(confirmed),
            None => warn!("Nothing is waiting for confirmation"),
        },
        Ok(command) => {
            if let HostCommand::Window(dimensions) = &command {
                metrics.set(*dimensions);
            }
            if command.may_need_confirmation() {
                let handle = handle.clone();
                tokio::spawn(async move {
                    print_reply(dispatch(&handle, command).await);
                });
            } else {
                print_reply(dispatch(handle, command).await);
            }
        }
        Err(err) => print_reply(Err(err)),
    }
    true
}

fn print_reply(result: Result<Value>) {
    match result {
        Ok(reply) => println!("{}", json!({ "reply": reply })),
        Err(err) => {
            warn!("Command failed: {err:#}");
            println!("{}", json!({ "error": format!("{err:#}") }));
        }
    }
}
