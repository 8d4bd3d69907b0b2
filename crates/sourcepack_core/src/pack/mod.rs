//! # Source Pack - one status for a fixed group of sources
//!
//! A [`SourcePack`] owns a fixed, ordered list of [`Source`]s, listens to their
//! status changes, and keeps a single [`PackState`] derived from all of them
//! with [`aggregate`]. It also drives loading across the group:
//!
//! - [`SourcePack::ensure_loaded`] loads every member plus the configured
//!   forced sources, at most [`concurrency_limit`] at a time.
//! - [`SourcePack::reload`] refreshes members; background-loadable members are
//!   refreshed in detached tasks, the rest are awaited.
//!
//! ## Observing a pack
//!
//! - [`SourcePack::subscribe_state`] yields a `watch` receiver that only sees
//!   actual changes of the derived state.
//! - [`SourcePack::ready_events`] yields a `broadcast` receiver that gets one
//!   [`ReadyEvent`] every time the pack becomes fully loaded: `Ready` with no
//!   background loading. Becoming `Ready` while a background member is still
//!   loading does not count until that member finishes.
//!
//! ```ignore
//! let pack = SourcePack::builder()
//!     .sources([feed, mirrors, changelog])
//!     .registry(registry)
//!     .build();
//!
//! let mut ready = pack.ready_events();
//! pack.ensure_loaded(CancellationToken::new()).await?;
//! if pack.status() == AggregateStatus::Error {
//!     eprintln!("{}", pack.error().unwrap());
//! }
//! ```
//!
//! ## Lifetime
//!
//! Sources hold only weak references to the pack's listener, so membership
//! never keeps a pack alive. Dropping the pack, or calling
//! [`SourcePack::dispose`], unsubscribes from every member exactly once.

use std::fmt;
use std::sync::Arc;
use std::task::Poll;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregate::{AggregateStatus, MemberSnapshot, PackState, aggregate};
use crate::config::PackConfig;
use crate::error::{CoreError, LoadError, Result};
use crate::fan_out::{concurrency_limit, when_all_bounded};
use crate::registry::{DEFAULT_FORCED_KEYS, EmptyRegistry, SourceRegistry};
use crate::source::{Source, SourceChange, SourceListener, SourceStatus, SubscriptionId};


const READY_CHANNEL_CAPACITY: usize = 16;

/// Emitted each time a pack becomes fully loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEvent {
    pub completed_at: DateTime<Utc>,
}

/// Shared between the pack handle and the members' listener tables.
struct PackInner {
    sources: Box<[Arc<dyn Source>]>,
    state: Mutex<PackState>,
    state_tx: watch::Sender<PackState>,
    ready_tx: broadcast::Sender<ReadyEvent>,
}

impl PackInner {
    fn snapshot(&self) -> PackState {
        aggregate(
            self.sources
                .iter()
                .map(|source| MemberSnapshot::of(source.as_ref())),
        )
    }

    /// Recompute and publish the derived state.
    ///
    /// The whole read-aggregate-publish sequence runs under `state`, so
    /// concurrent notifications cannot interleave.
    fn update_status(&self) {
        let mut current = self.state.lock();
        let next = self.snapshot();
        if *current == next {
            return;
        }

        let became_complete = next.loading_complete() && !current.loading_complete();
        debug!(
            from = ?current.status,
            to = ?next.status,
            background_loading = next.background_loading,
            has_error = next.error.is_some(),
            "Pack state changed"
        );

        *current = next.clone();
        self.state_tx.send_replace(next);

        if became_complete {
            info!(members = self.sources.len(), "Pack loading complete");
            // No receivers is fine.
            let _ = self.ready_tx.send(ReadyEvent {
                completed_at: Utc::now(),
            });
        }
    }
}

impl SourceListener for PackInner {
    fn on_source_changed(&self, source_key: &str, change: SourceChange) {
        if change == SourceChange::Status {
            debug!(source_key = %source_key, "Member status changed");
            self.update_status();
        }
    }
}

/// A fixed group of sources with one derived load status.
pub struct SourcePack {
    inner: Arc<PackInner>,
    registry: Arc<dyn SourceRegistry>,
    forced_keys: Vec<String>,
    subscriptions: Mutex<Option<Vec<SubscriptionId>>>,
}

impl SourcePack {
    /// Create a pack over `sources` using the default forced keys.
    pub fn new(
        sources: impl IntoIterator<Item = Arc<dyn Source>>,
        registry: Arc<dyn SourceRegistry>,
    ) -> Self {
        Self::builder().sources(sources).registry(registry).build()
    }

    pub fn builder() -> SourcePackBuilder {
        SourcePackBuilder::default()
    }

    fn from_parts(
        sources: Vec<Arc<dyn Source>>,
        registry: Arc<dyn SourceRegistry>,
        forced_keys: Vec<String>,
    ) -> Self {
        let sources = sources.into_boxed_slice();
        let initial = aggregate(
            sources
                .iter()
                .map(|source| MemberSnapshot::of(source.as_ref())),
        );
        let (state_tx, _) = watch::channel(initial.clone());
        let (ready_tx, _) = broadcast::channel(READY_CHANNEL_CAPACITY);

        let inner = Arc::new(PackInner {
            sources,
            state: Mutex::new(initial),
            state_tx,
            ready_tx,
        });

        let listener: Arc<dyn SourceListener> = inner.clone();
        let weak = Arc::downgrade(&listener);
        drop(listener);
        let subscriptions = inner
            .sources
            .iter()
            .map(|source| source.subscribe(weak.clone()))
            .collect();

        // Catch changes that landed between the first snapshot and subscribing.
        inner.update_status();

        debug!(
            members = inner.sources.len(),
            status = ?inner.state.lock().status,
            "Created source pack"
        );

        Self {
            inner,
            registry,
            forced_keys,
            subscriptions: Mutex::new(Some(subscriptions)),
        }
    }

    /// Members, in construction order.
    pub fn sources(&self) -> &[Arc<dyn Source>] {
        &self.inner.sources
    }

    /// First member with the given key.
    pub fn get(&self, key: &str) -> Option<&Arc<dyn Source>> {
        self.inner.sources.iter().find(|source| source.key() == key)
    }

    pub fn forced_keys(&self) -> &[String] {
        &self.forced_keys
    }

    /// Current derived state.
    pub fn state(&self) -> PackState {
        self.inner.state.lock().clone()
    }

    pub fn status(&self) -> AggregateStatus {
        self.inner.state.lock().status
    }

    pub fn background_loading(&self) -> bool {
        self.inner.state.lock().background_loading
    }

    pub fn error(&self) -> Option<LoadError> {
        self.inner.state.lock().error.clone()
    }

    /// `Ready` with nothing loading in the background.
    pub fn loading_complete(&self) -> bool {
        self.inner.state.lock().loading_complete()
    }

    /// Receiver for derived state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<PackState> {
        self.inner.state_tx.subscribe()
    }

    /// Receiver for readiness notifications.
    pub fn ready_events(&self) -> broadcast::Receiver<ReadyEvent> {
        self.inner.ready_tx.subscribe()
    }

    /// Load every member and every forced source that is not a member.
    ///
    /// Returns immediately when the pack is already fully loaded or in
    /// `Error`; callers can inspect [`SourcePack::error`] in the latter case.
    /// Member failures end up in the pack state, not in the result. The only
    /// error returned is [`CoreError::Cancelled`].
    pub async fn ensure_loaded(&self, cancel: CancellationToken) -> Result<()> {
        let state = self.state();
        if state.loading_complete() || state.status == AggregateStatus::Error {
            if cancel.is_cancelled() {
                return Err(CoreError::cancelled("ensure_loaded"));
            }
            debug!(status = ?state.status, "Pack already settled, nothing to load");
            return Ok(());
        }

        let forced = self.resolve_forced();
        let limit = concurrency_limit();
        debug!(
            members = self.inner.sources.len(),
            forced = forced.len(),
            limit,
            "Ensuring sources are loaded"
        );

        let ops = self
            .inner
            .sources
            .iter()
            .chain(forced.iter())
            .map(|source| source.ensure_loaded(cancel.clone()));

        when_all_bounded(ops, limit, &cancel)
            .await
            .map_err(|_| CoreError::cancelled("ensure_loaded"))
    }

    /// Reload members.
    ///
    /// Does nothing while a foreground load is running. With `non_ready_only`
    /// only members whose status is not `Ready` are reloaded. Background
    /// members are reloaded in detached tasks whose outcome is visible only
    /// through the members' own status; foreground members are awaited.
    ///
    /// Each detached reload is polled once before this method moves on, so a
    /// source that reports `Loading` when its reload starts is already
    /// counted in [`SourcePack::background_loading`] when `reload` returns.
    pub async fn reload(&self, non_ready_only: bool, cancel: CancellationToken) -> Result<()> {
        if self.status() == AggregateStatus::Loading {
            debug!("Pack is loading, skipping reload");
            return Ok(());
        }

        let selected = |source: &&Arc<dyn Source>| {
            !non_ready_only || source.status() != SourceStatus::Ready
        };

        let mut started = Vec::new();
        for source in self
            .inner
            .sources
            .iter()
            .filter(|source| source.is_background_loadable())
            .filter(selected)
        {
            let source = Arc::clone(source);
            let cancel = cancel.clone();
            let (started_tx, started_rx) = oneshot::channel();
            started.push(started_rx);
            tokio::spawn(async move {
                let mut reload = source.reload(cancel);
                let first = futures::poll!(&mut reload);
                let _ = started_tx.send(());
                let outcome = match first {
                    Poll::Ready(outcome) => outcome,
                    Poll::Pending => reload.await,
                };
                if let Err(e) = outcome {
                    debug!(source_key = %source.key(), error = %e, "Background reload failed");
                }
            });
        }
        // Background reloads have reported Loading by the time this resolves.
        join_all(started).await;

        let foreground: Vec<&Arc<dyn Source>> = self
            .inner
            .sources
            .iter()
            .filter(|source| !source.is_background_loadable())
            .filter(selected)
            .collect();
        debug!(
            foreground = foreground.len(),
            non_ready_only, "Reloading sources"
        );

        let ops = foreground
            .into_iter()
            .map(|source| source.reload(cancel.clone()));

        when_all_bounded(ops, concurrency_limit(), &cancel)
            .await
            .map_err(|_| CoreError::cancelled("reload"))
    }

    /// Unsubscribe from every member and drop the pack.
    pub fn dispose(self) {
        self.unsubscribe_all();
    }

    fn resolve_forced(&self) -> Vec<Arc<dyn Source>> {
        self.forced_keys
            .iter()
            .filter(|key| self.get(key).is_none())
            .filter_map(|key| {
                let source = self.registry.resolve(key);
                if source.is_none() {
                    debug!(source_key = %key, "Forced source not found in registry");
                }
                source
            })
            .collect()
    }

    fn unsubscribe_all(&self) {
        let Some(subscriptions) = self.subscriptions.lock().take() else {
            return;
        };
        for (source, id) in self.inner.sources.iter().zip(subscriptions) {
            source.unsubscribe(id);
        }
        debug!(members = self.inner.sources.len(), "Source pack disposed");
    }
}

impl Drop for SourcePack {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

impl fmt::Debug for SourcePack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.inner.sources.iter().map(|s| s.key()).collect();
        f.debug_struct("SourcePack")
            .field("sources", &keys)
            .field("state", &*self.inner.state.lock())
            .field("forced_keys", &self.forced_keys)
            .finish()
    }
}

/// Builder for [`SourcePack`].
#[derive(Default)]
pub struct SourcePackBuilder {
    sources: Vec<Arc<dyn Source>>,
    registry: Option<Arc<dyn SourceRegistry>>,
    forced_keys: Option<Vec<String>>,
}

impl SourcePackBuilder {
    pub fn source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = Arc<dyn Source>>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Registry used to resolve forced keys. Defaults to [`EmptyRegistry`].
    pub fn registry(mut self, registry: Arc<dyn SourceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the default forced keys.
    pub fn forced_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.forced_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Take forced keys from `config`.
    pub fn config(self, config: &PackConfig) -> Self {
        self.forced_keys(config.forced_keys.iter().cloned())
    }

    pub fn build(self) -> SourcePack {
        let forced_keys = self
            .forced_keys
            .unwrap_or_else(|| DEFAULT_FORCED_KEYS.iter().map(|k| k.to_string()).collect());
        SourcePack::from_parts(
            self.sources,
            self.registry
                .unwrap_or_else(|| Arc::new(EmptyRegistry) as Arc<dyn SourceRegistry>),
            forced_keys,
        )
    }
}
