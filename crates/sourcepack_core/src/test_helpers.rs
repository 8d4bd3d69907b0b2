#![cfg(test)]

pub mod sources {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Weak};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use crate::error::{CoreError, LoadError, Result};
    use crate::source::{Source, SourceListener, SourceState, SourceStatus, SubscriptionId};

    /// Shared counter of loads in flight across several mock sources.
    #[derive(Debug, Default)]
    pub struct LoadGauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
    }

    impl LoadGauge {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }

        pub fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        pub fn in_flight(&self) -> usize {
            self.in_flight.load(Ordering::SeqCst)
        }

        fn enter(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Configurable in-memory source.
    ///
    /// Loads move the source to `Loading`, wait `delay`, then finish as
    /// `Ready` or, when a failure is configured, as `Error`.
    #[derive(Debug)]
    pub struct MockSource {
        state: SourceState,
        background: bool,
        delay: Duration,
        failure: Mutex<Option<LoadError>>,
        gauge: Option<Arc<LoadGauge>>,
        ensure_calls: AtomicUsize,
        reload_calls: AtomicUsize,
    }

    pub struct MockSourceBuilder {
        key: String,
        status: SourceStatus,
        background: bool,
        delay: Duration,
        failure: Option<LoadError>,
        gauge: Option<Arc<LoadGauge>>,
    }

    impl MockSourceBuilder {
        pub fn status(mut self, status: SourceStatus) -> Self {
            self.status = status;
            self
        }

        pub fn background(mut self) -> Self {
            self.background = true;
            self
        }

        pub fn delay_ms(mut self, millis: u64) -> Self {
            self.delay = Duration::from_millis(millis);
            self
        }

        pub fn failing(mut self, message: &str) -> Self {
            self.failure = Some(LoadError::new(message));
            self
        }

        pub fn gauge(mut self, gauge: Arc<LoadGauge>) -> Self {
            self.gauge = Some(gauge);
            self
        }

        pub fn build(self) -> Arc<MockSource> {
            Arc::new(MockSource {
                state: SourceState::with_status(self.key, self.status),
                background: self.background,
                delay: self.delay,
                failure: Mutex::new(self.failure),
                gauge: self.gauge,
                ensure_calls: AtomicUsize::new(0),
                reload_calls: AtomicUsize::new(0),
            })
        }
    }

    impl MockSource {
        pub fn builder(key: &str) -> MockSourceBuilder {
            MockSourceBuilder {
                key: key.to_string(),
                status: SourceStatus::NotLoaded,
                background: false,
                delay: Duration::from_millis(5),
                failure: None,
                gauge: None,
            }
        }

        pub fn new(key: &str) -> Arc<Self> {
            Self::builder(key).build()
        }

        pub fn with_status(key: &str, status: SourceStatus) -> Arc<Self> {
            Self::builder(key).status(status).build()
        }

        /// Change status from outside, as a source's own background work would.
        pub fn set_status(&self, status: SourceStatus) {
            self.state.set_status(status);
        }

        pub fn fail_with(&self, message: &str) {
            self.state.fail(LoadError::new(message));
        }

        /// Replace the error payload without touching the status.
        pub fn set_error(&self, message: &str) {
            self.state.set_error(Some(LoadError::new(message)));
        }

        pub fn notify_details(&self) {
            self.state.notify_details();
        }

        pub fn ensure_calls(&self) -> usize {
            self.ensure_calls.load(Ordering::SeqCst)
        }

        pub fn reload_calls(&self) -> usize {
            self.reload_calls.load(Ordering::SeqCst)
        }

        pub fn listener_count(&self) -> usize {
            self.state.listener_count()
        }

        async fn load(&self, cancel: CancellationToken) -> Result<()> {
            if let Some(gauge) = &self.gauge {
                gauge.enter();
            }
            self.state.set_status(SourceStatus::Loading);

            let cancelled = tokio::select! {
                () = cancel.cancelled() => true,
                () = tokio::time::sleep(self.delay) => false,
            };

            if let Some(gauge) = &self.gauge {
                gauge.leave();
            }

            if cancelled {
                self.state.set_status(SourceStatus::NotLoaded);
                return Err(CoreError::cancelled(format!("load {}", self.state.key())));
            }

            let failure = self.failure.lock().clone();
            match failure {
                Some(error) => self.state.fail(error),
                None => self.state.complete(),
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Source for MockSource {
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
            self.ensure_calls.fetch_add(1, Ordering::SeqCst);
            if self.state.status() == SourceStatus::Ready {
                return Ok(());
            }
            self.load(cancel).await
        }

        async fn reload(&self, cancel: CancellationToken) -> Result<()> {
            self.reload_calls.fetch_add(1, Ordering::SeqCst);
            self.load(cancel).await
        }

        fn subscribe(&self, listener: Weak<dyn SourceListener>) -> SubscriptionId {
            self.state.subscribe(listener)
        }

        fn unsubscribe(&self, id: SubscriptionId) -> bool {
            self.state.unsubscribe(id)
        }
    }
}
