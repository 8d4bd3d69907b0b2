//! Integration tests driving a SourcePack through its public API.
//!
//! Sources here are built on the public `SourceState` helper the same way a
//! downstream source implementation would be, with loads held open by a gate
//! so the tests can observe intermediate pack states.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use sourcepack_core::prelude::*;
use sourcepack_core::{CoreError, InMemoryRegistry, SourceListener, SubscriptionId};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Source whose loads block until its gate opens.
#[derive(Debug)]
struct GatedSource {
    state: SourceState,
    background: bool,
    gate: watch::Sender<bool>,
    outcome: parking_lot::Mutex<Option<LoadError>>,
    loads: AtomicUsize,
}

impl GatedSource {
    fn new(key: &str) -> Arc<Self> {
        Self::build(key, false)
    }

    fn background(key: &str) -> Arc<Self> {
        Self::build(key, true)
    }

    fn build(key: &str, background: bool) -> Arc<Self> {
        Arc::new(Self {
            state: SourceState::new(key),
            background,
            gate: watch::channel(false).0,
            outcome: parking_lot::Mutex::new(None),
            loads: AtomicUsize::new(0),
        })
    }

    fn open(&self) {
        self.gate.send_replace(true);
    }

    fn fail_next(&self, message: &str) {
        *self.outcome.lock() = Some(LoadError::new(message));
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    async fn load(&self, cancel: CancellationToken) -> Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.state.set_status(SourceStatus::Loading);

        let mut gate = self.gate.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => {
                self.state.set_status(SourceStatus::NotLoaded);
                return Err(CoreError::cancelled(format!("load {}", self.state.key())));
            }
            _ = gate.wait_for(|open| *open) => {}
        }

        match self.outcome.lock().take() {
            Some(error) => self.state.fail(error),
            None => self.state.complete(),
        }
        Ok(())
    }
}

#[async_trait]
impl Source for GatedSource {
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

async fn wait_for_status(pack: &SourcePack, status: AggregateStatus) -> PackState {
    let mut states = pack.subscribe_state();
    let state = tokio::time::timeout(Duration::from_secs(2), states.wait_for(|s| s.status == status))
        .await
        .expect("pack never reached the expected status")
        .expect("pack state channel closed");
    state.clone()
}

#[tokio::test]
async fn test_full_load_cycle() {
    let feed = GatedSource::new("feed");
    let mirrors = GatedSource::new("mirrors");
    let pack = Arc::new(
        SourcePack::builder()
            .source(feed.clone())
            .source(mirrors.clone())
            .forced_keys(Vec::<String>::new())
            .build(),
    );
    let mut ready = pack.ready_events();

    assert_eq!(pack.status(), AggregateStatus::Waiting);

    let loader = {
        let pack = pack.clone();
        tokio::spawn(async move { pack.ensure_loaded(CancellationToken::new()).await })
    };

    wait_for_status(&pack, AggregateStatus::Loading).await;
    assert!(!pack.loading_complete());

    feed.open();
    mirrors.open();

    loader.await.unwrap().unwrap();
    assert!(pack.loading_complete());

    let event = tokio::time::timeout(Duration::from_secs(1), ready.recv()).await;
    assert!(matches!(event, Ok(Ok(_))));
    assert!(ready.try_recv().is_err());
}

#[tokio::test]
async fn test_failure_then_retry_through_reload() {
    let feed = GatedSource::new("feed");
    feed.open();
    feed.fail_next("feed offline");
    let pack = SourcePack::builder()
        .source(feed.clone())
        .forced_keys(Vec::<String>::new())
        .build();

    pack.ensure_loaded(CancellationToken::new()).await.unwrap();
    assert_eq!(pack.status(), AggregateStatus::Error);
    assert_eq!(pack.error(), Some(LoadError::new("feed offline")));

    // An errored pack does not retry on ensure_loaded.
    pack.ensure_loaded(CancellationToken::new()).await.unwrap();
    assert_eq!(feed.loads(), 1);

    pack.reload(true, CancellationToken::new()).await.unwrap();
    assert_eq!(feed.loads(), 2);
    assert!(pack.loading_complete());
    assert!(pack.error().is_none());
}

#[tokio::test]
async fn test_background_member_completes_after_foreground() {
    let feed = GatedSource::new("feed");
    let archive = GatedSource::background("archive");
    let pack = SourcePack::builder()
        .sources([feed.clone() as Arc<dyn Source>, archive.clone() as Arc<dyn Source>])
        .forced_keys(Vec::<String>::new())
        .build();
    let mut ready = pack.ready_events();

    feed.open();
    let cancel = CancellationToken::new();
    let loading = pack.ensure_loaded(cancel.clone());
    tokio::pin!(loading);

    let state = tokio::select! {
        state = wait_for_status(&pack, AggregateStatus::Ready) => state,
        _ = &mut loading => panic!("ensure_loaded finished before the background member"),
    };
    assert!(state.background_loading);
    assert!(ready.try_recv().is_err());

    archive.open();
    loading.await.unwrap();

    assert!(pack.loading_complete());
    assert!(ready.try_recv().is_ok());
}

#[tokio::test]
async fn test_forced_sources_from_registry_and_config() {
    let registry = Arc::new(InMemoryRegistry::new());
    let favorites = GatedSource::new("favorites");
    let pinned = GatedSource::new("pinned");
    favorites.open();
    pinned.open();
    registry.register(favorites.clone());
    registry.register(pinned.clone());

    let config = PackConfig {
        forced_keys: vec!["pinned".to_string(), "missing".to_string()],
        ..PackConfig::default()
    };

    let feed = GatedSource::new("feed");
    feed.open();
    let pack = SourcePack::builder()
        .source(feed.clone())
        .registry(registry)
        .config(&config)
        .build();

    pack.ensure_loaded(CancellationToken::new()).await.unwrap();

    assert_eq!(feed.loads(), 1);
    assert_eq!(pinned.loads(), 1);
    assert_eq!(favorites.loads(), 0);
    assert_eq!(pinned.status(), SourceStatus::Ready);
}

#[tokio::test]
async fn test_cancel_mid_load_leaves_pack_incomplete() {
    let first = GatedSource::new("first");
    let second = GatedSource::new("second");
    first.open();
    let pack = SourcePack::builder()
        .source(first.clone())
        .source(second.clone())
        .forced_keys(Vec::<String>::new())
        .build();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(2), pack.ensure_loaded(cancel))
        .await
        .expect("cancellation should settle promptly");

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(first.status(), SourceStatus::Ready);
    assert_eq!(second.status(), SourceStatus::NotLoaded);
    assert_eq!(pack.status(), AggregateStatus::Waiting);
}

#[tokio::test]
async fn test_dropping_pack_releases_members() {
    let feed = GatedSource::new("feed");
    let pack = SourcePack::builder()
        .source(feed.clone())
        .forced_keys(Vec::<String>::new())
        .build();
    assert_eq!(feed.state.listener_count(), 1);

    let states = pack.subscribe_state();
    drop(pack);

    assert_eq!(feed.state.listener_count(), 0);
    feed.state.set_status(SourceStatus::Ready);
    assert_eq!(states.borrow().status, AggregateStatus::Waiting);
}
