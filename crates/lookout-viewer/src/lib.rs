//! Image/detection poller backing the live camera view.
//!
//! Each tick fetches the image list, refetches detections only when the
//! list changed, joins the two and publishes the result through a watch
//! channel. A failed tick never touches what is on display.

pub mod reconcile;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lookout_client::HttpBackend;
use lookout_types::{
    config::{DetectionRefresh, ViewerConfig},
    images::{DetectionMap, ImageRecord, JoinedImage},
    Result,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, warn};

pub use reconcile::{images_changed, join_detections};

/// Read-only endpoints the poller needs.
#[async_trait]
pub trait ImageFeed: Send + Sync {
    async fn fetch_images(&self) -> Result<Vec<ImageRecord>>;
    async fn fetch_detections(&self) -> Result<DetectionMap>;
}

#[async_trait]
impl ImageFeed for HttpBackend {
    async fn fetch_images(&self) -> Result<Vec<ImageRecord>> {
        self.images().await
    }

    async fn fetch_detections(&self) -> Result<DetectionMap> {
        self.detections().await
    }
}

/// What the view renders.
#[derive(Debug, Clone, Default)]
pub struct ViewerState {
    pub images: Vec<JoinedImage>,
    /// Generation of the poll that produced `images`; zero before the first commit.
    pub generation: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ViewerState {
    pub fn annotated_count(&self) -> usize {
        self.images
            .iter()
            .filter(|image| image.detections.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Updated {
        changed: bool,
        detections_refreshed: bool,
    },
    /// Another poll was still in flight.
    Skipped,
    /// A fetch failed; display state is unchanged.
    Failed,
    /// The poller was torn down or superseded while fetching.
    Discarded,
}

#[derive(Default)]
struct PollCache {
    images: Vec<ImageRecord>,
    detections: DetectionMap,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ImagePoller<F: ImageFeed> {
    feed: F,
    refresh: DetectionRefresh,
    state: watch::Sender<ViewerState>,
    cache: Mutex<PollCache>,
    in_flight: AtomicBool,
    generation: AtomicU64,
    active: AtomicBool,
}

impl<F: ImageFeed> ImagePoller<F> {
    pub fn new(feed: F, refresh: DetectionRefresh) -> Self {
        let (state, _) = watch::channel(ViewerState::default());
        Self {
            feed,
            refresh,
            state,
            cache: Mutex::new(PollCache::default()),
            in_flight: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            active: AtomicBool::new(true),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewerState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ViewerState {
        self.state.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop committing results. Polls still in flight are discarded when
    /// they complete.
    pub fn deactivate(&self) {
        let _cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        self.active.store(false, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.is_active() && self.generation.load(Ordering::Acquire) == generation
    }

    /// Run one fetch-compare-join cycle.
    pub async fn poll(&self) -> PollOutcome {
        if !self.is_active() {
            return PollOutcome::Discarded;
        }
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Previous poll still in flight; skipping tick");
            return PollOutcome::Skipped;
        }
        let _guard = InFlight(&self.in_flight);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let images = match self.feed.fetch_images().await {
            Ok(images) => images,
            Err(err) => {
                warn!("Failed to fetch images: {err}");
                return PollOutcome::Failed;
            }
        };

        let (changed, cached) = {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = images_changed(&cache.images, &images);
            let reuse = !changed && self.refresh == DetectionRefresh::OnChange;
            (changed, reuse.then(|| cache.detections.clone()))
        };

        let detections_refreshed = cached.is_none();
        let detections = match cached {
            Some(detections) => detections,
            None => match self.feed.fetch_detections().await {
                Ok(detections) => detections,
                Err(err) => {
                    warn!("Failed to fetch detections: {err}");
                    return PollOutcome::Failed;
                }
            },
        };

        let joined = join_detections(&images, &detections);
        {
            // Check and commit under the cache lock; `deactivate` takes it too.
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.is_current(generation) {
                debug!("Discarding result of poll {}", generation);
                return PollOutcome::Discarded;
            }
            cache.images = images;
            cache.detections = detections;
            self.state.send_replace(ViewerState {
                images: joined,
                generation,
                updated_at: Some(Utc::now()),
            });
        }
        debug!(
            "Poll {} committed (changed: {}, detections refreshed: {})",
            generation, changed, detections_refreshed
        );
        PollOutcome::Updated {
            changed,
            detections_refreshed,
        }
    }
}

impl<F: ImageFeed + 'static> ImagePoller<F> {
    /// Poll immediately, then every `every`. Each tick runs as its own task,
    /// so a slow fetch never delays the timer; the in-flight guard keeps
    /// ticks from overlapping.
    pub fn spawn(self: Arc<Self>, every: Duration) -> PollerHandle<F> {
        let poller = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let poller = Arc::clone(&poller);
                tokio::spawn(async move {
                    poller.poll().await;
                });
            }
        });
        PollerHandle {
            poller: self,
            task: Some(task),
        }
    }
}

/// Owns the polling timer for one view. Dropping it stops the timer and
/// deactivates the poller.
pub struct PollerHandle<F: ImageFeed> {
    poller: Arc<ImagePoller<F>>,
    task: Option<JoinHandle<()>>,
}

impl<F: ImageFeed> PollerHandle<F> {
    pub fn state(&self) -> watch::Receiver<ViewerState> {
        self.poller.subscribe()
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.poller.deactivate();
        }
    }
}

impl<F: ImageFeed> Drop for PollerHandle<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn poll_interval(config: &ViewerConfig) -> Duration {
    Duration::from_secs(config.poll_interval_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use lookout_types::{
        config::BackendConfig,
        images::{DetectionBox, DetectionResult},
        LookoutError,
    };
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::{sync::Notify, time::timeout};

    struct MockFeed {
        images: Mutex<std::result::Result<Vec<ImageRecord>, String>>,
        detections: Mutex<std::result::Result<DetectionMap, String>>,
        image_calls: AtomicUsize,
        detection_calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl Default for MockFeed {
        fn default() -> Self {
            Self {
                images: Mutex::new(Ok(Vec::new())),
                detections: Mutex::new(Ok(DetectionMap::new())),
                image_calls: AtomicUsize::new(0),
                detection_calls: AtomicUsize::new(0),
                gate: None,
            }
        }
    }

    impl MockFeed {
        fn set_images(&self, images: Vec<ImageRecord>) {
            *self.images.lock().unwrap() = Ok(images);
        }

        fn fail_images(&self) {
            *self.images.lock().unwrap() = Err("connection refused".into());
        }

        fn set_detections(&self, detections: DetectionMap) {
            *self.detections.lock().unwrap() = Ok(detections);
        }
    }

    #[async_trait]
    impl ImageFeed for MockFeed {
        async fn fetch_images(&self) -> Result<Vec<ImageRecord>> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.images
                .lock()
                .unwrap()
                .clone()
                .map_err(LookoutError::Transport)
        }

        async fn fetch_detections(&self) -> Result<DetectionMap> {
            self.detection_calls.fetch_add(1, Ordering::SeqCst);
            self.detections
                .lock()
                .unwrap()
                .clone()
                .map_err(LookoutError::Transport)
        }
    }

    fn image(source: &str, instance: Option<&str>, modified_at: i64) -> ImageRecord {
        ImageRecord {
            source: source.into(),
            instance: instance.map(str::to_string),
            url: format!("/frames/{source}.jpg"),
            timestamp: "2024-05-01 10:00:00".into(),
            modified_at: json!(modified_at),
            kind: None,
        }
    }

    fn detection(score: f64) -> DetectionResult {
        DetectionResult {
            results: vec![DetectionBox {
                left: 726.0,
                top: 345.0,
                right: 862.0,
                bottom: 413.0,
                score,
            }],
        }
    }

    fn detections(entries: &[(&str, f64)]) -> DetectionMap {
        entries
            .iter()
            .map(|(key, score)| (key.to_string(), detection(*score)))
            .collect()
    }

    #[tokio::test]
    async fn joins_two_images_against_one_detection_entry() {
        let feed = MockFeed::default();
        feed.set_images(vec![image("cam1", Some("gate"), 1), image("cam2", None, 1)]);
        feed.set_detections(detections(&[("gate", 0.86)]));
        let poller = ImagePoller::new(feed, DetectionRefresh::OnChange);

        let outcome = poller.poll().await;
        assert_eq!(
            outcome,
            PollOutcome::Updated {
                changed: true,
                detections_refreshed: true
            }
        );
        let state = poller.snapshot();
        assert_eq!(state.images.len(), 2);
        assert_eq!(state.annotated_count(), 1);
        assert_eq!(state.images[0].detections, Some(detection(0.86)));
        assert!(state.images[1].detections.is_none());
        assert_eq!(state.images[1].image.source, "cam2");
    }

    #[tokio::test]
    async fn modified_image_triggers_detection_refetch() {
        let feed = MockFeed::default();
        feed.set_images(vec![image("cam1", None, 1)]);
        feed.set_detections(detections(&[("cam1", 0.5)]));
        let poller = ImagePoller::new(feed, DetectionRefresh::OnChange);

        poller.poll().await;
        assert_eq!(poller.feed.detection_calls.load(Ordering::SeqCst), 1);

        poller.feed.set_images(vec![image("cam1", None, 2)]);
        poller.feed.set_detections(detections(&[("cam1", 0.9)]));
        let outcome = poller.poll().await;
        assert_eq!(
            outcome,
            PollOutcome::Updated {
                changed: true,
                detections_refreshed: true
            }
        );
        assert_eq!(poller.feed.detection_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            poller.snapshot().images[0].detections,
            Some(detection(0.9))
        );
    }

    #[tokio::test]
    async fn unchanged_images_reuse_cached_detections() {
        let feed = MockFeed::default();
        feed.set_images(vec![image("cam1", None, 1)]);
        feed.set_detections(detections(&[("cam1", 0.5)]));
        let poller = ImagePoller::new(feed, DetectionRefresh::OnChange);

        poller.poll().await;
        poller.feed.set_detections(detections(&[("cam1", 0.99)]));
        let outcome = poller.poll().await;
        assert_eq!(
            outcome,
            PollOutcome::Updated {
                changed: false,
                detections_refreshed: false
            }
        );
        assert_eq!(poller.feed.detection_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            poller.snapshot().images[0].detections,
            Some(detection(0.5))
        );
    }

    #[tokio::test]
    async fn every_tick_policy_always_refetches() {
        let feed = MockFeed::default();
        feed.set_images(vec![image("cam1", None, 1)]);
        feed.set_detections(detections(&[("cam1", 0.5)]));
        let poller = ImagePoller::new(feed, DetectionRefresh::EveryTick);

        poller.poll().await;
        poller.feed.set_detections(detections(&[("cam1", 0.99)]));
        poller.poll().await;
        assert_eq!(poller.feed.detection_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            poller.snapshot().images[0].detections,
            Some(detection(0.99))
        );
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_list() {
        let feed = MockFeed::default();
        feed.set_images(vec![image("cam1", None, 1), image("cam2", None, 1)]);
        feed.set_detections(detections(&[("cam1", 0.5)]));
        let poller = ImagePoller::new(feed, DetectionRefresh::OnChange);

        poller.poll().await;
        let before = poller.snapshot();

        poller.feed.fail_images();
        assert_eq!(poller.poll().await, PollOutcome::Failed);
        let after = poller.snapshot();
        assert_eq!(after.images, before.images);
        assert_eq!(after.generation, before.generation);

        poller.feed.set_images(vec![image("cam3", None, 5)]);
        *poller.feed.detections.lock().unwrap() = Err("timeout".into());
        assert_eq!(poller.poll().await, PollOutcome::Failed);
        assert_eq!(poller.snapshot().images, before.images);

        // The changed list is still detected on the next successful tick.
        poller.feed.set_detections(DetectionMap::new());
        assert!(matches!(
            poller.poll().await,
            PollOutcome::Updated { changed: true, .. }
        ));
        assert_eq!(poller.snapshot().images.len(), 1);
    }

    #[tokio::test]
    async fn overlapping_polls_are_single_flight() {
        let gate = Arc::new(Notify::new());
        let feed = MockFeed {
            gate: Some(Arc::clone(&gate)),
            ..MockFeed::default()
        };
        feed.set_images(vec![image("cam1", None, 1)]);
        feed.set_detections(DetectionMap::new());
        let poller = Arc::new(ImagePoller::new(feed, DetectionRefresh::OnChange));

        let first = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.poll().await })
        };
        while poller.feed.image_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(poller.poll().await, PollOutcome::Skipped);
        gate.notify_one();
        assert!(matches!(
            first.await.expect("join"),
            PollOutcome::Updated { .. }
        ));
        assert_eq!(poller.feed.image_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_response_after_teardown_is_discarded() {
        let gate = Arc::new(Notify::new());
        let feed = MockFeed {
            gate: Some(Arc::clone(&gate)),
            ..MockFeed::default()
        };
        feed.set_images(vec![image("cam1", None, 1)]);
        feed.set_detections(DetectionMap::new());
        let poller = Arc::new(ImagePoller::new(feed, DetectionRefresh::OnChange));

        let pending = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.poll().await })
        };
        while poller.feed.image_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        poller.deactivate();
        gate.notify_one();

        assert_eq!(pending.await.expect("join"), PollOutcome::Discarded);
        assert!(poller.snapshot().images.is_empty());
        assert_eq!(poller.poll().await, PollOutcome::Discarded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nothing_commits_once_deactivate_returns() {
        let gate = Arc::new(Notify::new());
        let feed = MockFeed {
            gate: Some(Arc::clone(&gate)),
            ..MockFeed::default()
        };
        feed.set_images(vec![image("cam1", None, 1)]);
        feed.set_detections(DetectionMap::new());
        let poller = Arc::new(ImagePoller::new(feed, DetectionRefresh::OnChange));

        let pending = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.poll().await })
        };
        while poller.feed.image_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        poller.deactivate();
        let at_teardown = poller.snapshot().generation;

        let outcome = pending.await.expect("join");
        assert_eq!(poller.snapshot().generation, at_teardown);
        if outcome == PollOutcome::Discarded {
            assert_eq!(at_teardown, 0);
        }
    }

    #[tokio::test]
    async fn spawned_poller_fires_immediately_and_stops_on_drop() {
        let feed = MockFeed::default();
        feed.set_images(vec![image("cam1", None, 1)]);
        feed.set_detections(DetectionMap::new());
        let poller = Arc::new(ImagePoller::new(feed, DetectionRefresh::OnChange));

        let handle = Arc::clone(&poller).spawn(Duration::from_secs(30));
        let mut state = handle.state();
        timeout(Duration::from_secs(2), state.wait_for(|s| s.generation > 0))
            .await
            .expect("first tick in time")
            .expect("state channel open");
        assert_eq!(poller.snapshot().images.len(), 1);

        drop(handle);
        assert!(!poller.is_active());
    }

    async fn spawn_backend() -> BackendConfig {
        let app = Router::new()
            .route(
                "/api/images",
                get(|| async {
                    Json(json!({ "images": [
                        { "source": "Spray Valley", "instance": "spray", "url": "/frames/youtube_spray.jpg",
                          "timestamp": "2024-05-01 10:00:00", "modified_at": 1714557600 },
                        { "source": "Big Tree", "url": "/frames/camera_bigtree.jpg",
                          "timestamp": "2024-05-01 10:00:05", "modified_at": 1714557605 }
                    ]}))
                }),
            )
            .route(
                "/api/detections",
                get(|| async {
                    Json(json!({ "detections": { "spray": { "results": [
                        { "left": 726, "top": 345, "right": 862, "bottom": 413, "score": 0.86 }
                    ]}}}))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        BackendConfig {
            base_url: format!("http://{addr}"),
            password: None,
            request_timeout_ms: 2_000,
        }
    }

    #[tokio::test]
    async fn http_backend_poll_joins_one_of_two_images() {
        let backend = HttpBackend::new(&spawn_backend().await).expect("client");
        let poller = ImagePoller::new(backend, DetectionRefresh::OnChange);

        assert_eq!(
            poller.poll().await,
            PollOutcome::Updated {
                changed: true,
                detections_refreshed: true
            }
        );
        let state = poller.snapshot();
        assert_eq!(state.images.len(), 2);
        assert_eq!(state.annotated_count(), 1);
        assert_eq!(state.images[0].image.source, "Spray Valley");
        assert_eq!(state.images[0].detections, Some(detection(0.86)));
        assert_eq!(state.images[1].image.source, "Big Tree");
        assert!(state.images[1].detections.is_none());

        assert_eq!(
            poller.poll().await,
            PollOutcome::Updated {
                changed: false,
                detections_refreshed: false
            }
        );
        assert_eq!(poller.snapshot().annotated_count(), 1);
    }
}
