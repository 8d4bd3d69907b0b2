//! Source capability - the contract every pack member satisfies.
//!
//! A source is an independently asynchronous data provider with its own load
//! status. Sources own their fetching, caching and retry; a
//! [`SourcePack`](crate::SourcePack) only observes their status and drives
//! `ensure_loaded` / `reload`.
//!
//! ## Change notification
//!
//! Observers register a [`SourceListener`] through [`Source::subscribe`]. The
//! source keeps only a `Weak` reference, so registering never extends the
//! listener's lifetime. Implementors usually embed a [`SourceState`], which
//! handles the status/error bookkeeping and the listener table.
//!
//! ```ignore
//! #[derive(Debug)]
//! struct FeedSource {
//!     state: SourceState,
//! }
//!
//! #[async_trait]
//! impl Source for FeedSource {
//!     fn key(&self) -> &str { self.state.key() }
//!     fn status(&self) -> SourceStatus { self.state.status() }
//!     fn error(&self) -> Option<LoadError> { self.state.error() }
//!
//!     async fn ensure_loaded(&self, cancel: CancellationToken) -> Result<()> {
//!         if self.state.status() == SourceStatus::Ready {
//!             return Ok(());
//!         }
//!         self.reload(cancel).await
//!     }
//!
//!     async fn reload(&self, cancel: CancellationToken) -> Result<()> {
//!         self.state.set_status(SourceStatus::Loading);
//!         match fetch(cancel).await {
//!             Ok(_) => self.state.set_status(SourceStatus::Ready),
//!             Err(e) => self.state.fail(LoadError::new(e.to_string())),
//!         }
//!         Ok(())
//!     }
//!
//!     fn subscribe(&self, listener: Weak<dyn SourceListener>) -> SubscriptionId {
//!         self.state.subscribe(listener)
//!     }
//!
//!     fn unsubscribe(&self, id: SubscriptionId) -> bool {
//!         self.state.unsubscribe(id)
//!     }
//! }
//! ```

mod state;

use std::fmt::Debug;
use std::sync::Weak;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{LoadError, Result};

pub use state::SourceState;

/// Load status of a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Nothing requested yet
    #[default]
    NotLoaded,
    /// Queued or waiting on a prerequisite
    Waiting,
    /// A fetch is in progress
    Loading,
    /// Data is available
    Ready,
    /// Last fetch failed, see [`Source::error`]
    Error,
}

/// What a change notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChange {
    /// [`Source::status`] changed
    Status,
    /// [`Source::error`] changed
    Error,
    /// Any other observable detail (item counts, labels, ...)
    Details,
}

/// Receiver of source change notifications.
///
/// Called synchronously by the source after the change is visible through its
/// getters. Implementations must not block.
pub trait SourceListener: Send + Sync {
    fn on_source_changed(&self, source_key: &str, change: SourceChange);
}

/// Handle returned by [`Source::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// An independently asynchronous data provider with an observable load status.
#[async_trait]
pub trait Source: Send + Sync + Debug {
    /// Identity key, unique within a pack and a registry
    fn key(&self) -> &str;

    /// Current load status
    fn status(&self) -> SourceStatus;

    /// Whether ongoing loading of this source may happen in the background
    /// without holding back the readiness of a pack it belongs to.
    ///
    /// Must not change over the lifetime of the source.
    fn is_background_loadable(&self) -> bool {
        false
    }

    /// Failure details, populated while `status()` is `Error`
    fn error(&self) -> Option<LoadError>;

    /// Load data unless it is already present.
    ///
    /// Completes immediately when the source already has data, joins an
    /// in-flight load otherwise. Load failures are reported through
    /// `status()`/`error()`, not through the returned result.
    async fn ensure_loaded(&self, cancel: CancellationToken) -> Result<()>;

    /// Fetch fresh data regardless of the current status.
    async fn reload(&self, cancel: CancellationToken) -> Result<()>;

    /// Register a change listener. Only a weak reference is retained.
    fn subscribe(&self, listener: Weak<dyn SourceListener>) -> SubscriptionId;

    /// Remove a listener. Returns `false` if the id was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}
