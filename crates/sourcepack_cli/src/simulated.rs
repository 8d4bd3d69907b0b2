//! Sources that pretend to load by sleeping.

use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use sourcepack_core::{
    CoreError, LoadError, Result, Source, SourceListener, SourceState, SourceStatus,
    SubscriptionId,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SimulatedSourceConfig;

/// A source whose load takes `delay` and optionally ends in a fixed error.
#[derive(Debug)]
pub struct SimulatedSource {
    state: SourceState,
    delay: Duration,
    background: bool,
    failure: Option<String>,
}

impl SimulatedSource {
    pub fn from_config(config: &SimulatedSourceConfig) -> Self {
        Self {
            state: SourceState::new(config.key.clone()),
            delay: Duration::from_millis(config.delay_ms),
            background: config.background,
            failure: config.fail.clone(),
        }
    }

    async fn load(&self, cancel: CancellationToken) -> Result<()> {
        self.state.set_status(SourceStatus::Loading);
        debug!(source_key = %self.key(), delay_ms = self.delay.as_millis() as u64, "Loading");

        tokio::select! {
            () = cancel.cancelled() => {
                self.state.set_status(SourceStatus::NotLoaded);
                return Err(CoreError::cancelled(format!("load {}", self.key())));
            }
            () = tokio::time::sleep(self.delay) => {}
        }

        match &self.failure {
            Some(message) => self.state.fail(
                LoadError::new(message.clone())
                    .with_commentary(format!("simulated failure of {}", self.key())),
            ),
            None => {
                self.state.complete();
                info!(source_key = %self.key(), "Loaded");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Source for SimulatedSource {
    fn key(&self) -> &str {
        self.state.key()
    }

    fn status(&self) -> SourceStatus {
        self.state.status()
    }

    fn is_background_loadable(&self) -> bool {
        self.background
    }

    fn error(&self) -> Option<LoadError> {
        self.state.error()
    }

    async fn ensure_loaded(&self, cancel: CancellationToken) -> Result<()> {
        if self.state.status() == SourceStatus::Ready {
            return Ok(());
        }
        self.load(cancel).await
    }

    async fn reload(&self, cancel: CancellationToken) -> Result<()> {
        self.load(cancel).await
    }

    fn subscribe(&self, listener: Weak<dyn SourceListener>) -> SubscriptionId {
        self.state.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.state.unsubscribe(id)
    }
}
