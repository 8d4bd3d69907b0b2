//! Builds a pack from the CLI configuration and drives it.

use std::sync::Arc;

use owo_colors::OwoColorize;
use sourcepack_core::{
    AggregateStatus, CoreError, InMemoryRegistry, PackState, Result, Source, SourcePack,
    SourceRegistry, SourceStatus,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CliConfig, SimulatedSourceConfig};
use crate::simulated::SimulatedSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Reload { non_ready_only: bool },
}

/// Members come from `[[sources]]`; forced keys without an entry are served
/// from a registry of default simulated sources.
pub fn build_pack(config: &CliConfig) -> SourcePack {
    let registry = InMemoryRegistry::new();
    for key in config.unlisted_forced_keys() {
        registry.register(Arc::new(SimulatedSource::from_config(
            &SimulatedSourceConfig::forced(key),
        )));
    }

    let members: Vec<Arc<dyn Source>> = config
        .sources
        .iter()
        .map(|source| Arc::new(SimulatedSource::from_config(source)) as Arc<dyn Source>)
        .collect();

    debug!(
        members = members.len(),
        forced = ?registry.keys(),
        "Building pack"
    );

    SourcePack::builder()
        .sources(members)
        .registry(Arc::new(registry) as Arc<dyn SourceRegistry>)
        .config(&config.pack)
        .build()
}

/// Log every derived state change until the pack goes away.
fn watch_state(pack: &SourcePack) -> JoinHandle<()> {
    let mut states = pack.subscribe_state();
    let mut ready = pack.ready_events();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = states.borrow_and_update().clone();
                    info!(
                        status = ?state.status,
                        background_loading = state.background_loading,
                        "Pack state"
                    );
                }
                event = ready.recv() => match event {
                    Ok(event) => info!(completed_at = %event.completed_at, "Pack ready"),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Wait until no load is running, foreground or background.
async fn settle(pack: &SourcePack, cancel: &CancellationToken) -> Result<PackState> {
    let mut states = pack.subscribe_state();
    let settled = states.wait_for(|s| s.status != AggregateStatus::Loading && !s.background_loading);
    tokio::select! {
        () = cancel.cancelled() => Err(CoreError::cancelled("waiting for background loads")),
        state = settled => Ok(state.map(|s| (*s).clone()).unwrap_or_else(|_| pack.state())),
    }
}

pub async fn run(pack: &SourcePack, operation: Operation, cancel: CancellationToken) -> Result<PackState> {
    let watcher = watch_state(pack);

    let outcome = match operation {
        Operation::Load => pack.ensure_loaded(cancel.clone()).await,
        Operation::Reload { non_ready_only } => pack.reload(non_ready_only, cancel.clone()).await,
    };
    let outcome = match outcome {
        Ok(()) => settle(pack, &cancel).await,
        Err(e) => Err(e),
    };

    watcher.abort();
    let state = outcome?;

    if state.status == AggregateStatus::Error {
        // Last failed member, matching the error the pack exposes.
        let failed = pack
            .sources()
            .iter()
            .rev()
            .find(|source| source.status() == SourceStatus::Error);
        let (key, cause) = match (failed, &state.error) {
            (Some(source), Some(error)) => (source.key().to_string(), error.to_string()),
            (Some(source), None) => (source.key().to_string(), "unknown error".to_string()),
            (None, error) => (
                "pack".to_string(),
                error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            ),
        };
        warn!(source_key = %key, "Pack finished with an error");
        return Err(CoreError::source_failed(key, operation_name(operation), cause));
    }

    Ok(state)
}

fn operation_name(operation: Operation) -> &'static str {
    match operation {
        Operation::Load => "load",
        Operation::Reload { .. } => "reload",
    }
}

/// One line per member plus the pack summary.
pub fn print_summary(pack: &SourcePack) {
    for source in pack.sources() {
        let status = format!("{:?}", source.status());
        let status = match source.status() {
            SourceStatus::Ready => status.green().to_string(),
            SourceStatus::Error => status.red().to_string(),
            SourceStatus::Loading => status.yellow().to_string(),
            SourceStatus::Waiting | SourceStatus::NotLoaded => status.dimmed().to_string(),
        };
        let background = if source.is_background_loadable() {
            " (background)".dimmed().to_string()
        } else {
            String::new()
        };
        println!("  {:<16} {}{}", source.key().bold(), status, background);
        if let Some(error) = source.error() {
            println!("    {}", error.to_string().red());
        }
    }

    let state = pack.state();
    println!(
        "{} {:?}{}",
        "pack:".bold(),
        state.status,
        if state.background_loading {
            " (background loading)"
        } else {
            ""
        }
    );
}
