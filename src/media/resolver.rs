use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::media::descriptor::{MediaDescriptor, MediaHandle, MediaKey};
use crate::media::error::MediaError;
use crate::media::kind::MediaKind;
use crate::media::store::HandleStore;
use crate::media::transport::MediaTransport;
use crate::media::upload::UploadPipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleSource {
    Static,
    Cached,
    /// Fresh upload. The upload itself delivered the media to the requesting chat.
    Uploaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub handle: MediaHandle,
    pub kind: MediaKind,
    pub source: HandleSource,
}

impl Resolution {
    pub fn already_delivered(&self) -> bool {
        self.source == HandleSource::Uploaded
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveRequest {
    /// Chat a first-time upload is sent to.
    pub chat_id: i64,
    /// Text sent to `chat_id` before a first-time upload starts.
    pub upload_notice: Option<String>,
}

impl ResolveRequest {
    pub fn silent(chat_id: i64) -> Self {
        Self {
            chat_id,
            upload_notice: None,
        }
    }

    pub fn with_notice(chat_id: i64, notice: impl Into<String>) -> Self {
        Self {
            chat_id,
            upload_notice: Some(notice.into()),
        }
    }
}

/// Pre-provisioned handles from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticHandles {
    handles: HashMap<MediaKey, MediaHandle>,
}

impl StaticHandles {
    pub fn new(handles: impl IntoIterator<Item = (MediaKey, MediaHandle)>) -> Self {
        Self {
            handles: handles
                .into_iter()
                .filter(|(_, handle)| !handle.is_empty())
                .collect(),
        }
    }

    pub fn get(&self, key: &MediaKey) -> Option<&MediaHandle> {
        self.handles.get(key)
    }

    pub fn contains(&self, key: &MediaKey) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

/// One step of the resolution chain. `Ok(None)` defers to the next step.
#[async_trait]
pub trait ResolutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        descriptor: &MediaDescriptor,
        request: &ResolveRequest,
    ) -> Result<Option<Resolution>, MediaError>;
}

pub struct StaticHandleStrategy {
    handles: Arc<StaticHandles>,
}

impl StaticHandleStrategy {
    pub fn new(handles: Arc<StaticHandles>) -> Self {
        Self { handles }
    }
}

#[async_trait]
impl ResolutionStrategy for StaticHandleStrategy {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn resolve(
        &self,
        descriptor: &MediaDescriptor,
        _request: &ResolveRequest,
    ) -> Result<Option<Resolution>, MediaError> {
        Ok(self
            .handles
            .get(&descriptor.key)
            .map(|handle| Resolution {
                handle: handle.clone(),
                kind: descriptor.kind,
                source: HandleSource::Static,
            }))
    }
}

pub struct CachedHandleStrategy {
    store: Arc<HandleStore>,
}

impl CachedHandleStrategy {
    pub fn new(store: Arc<HandleStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResolutionStrategy for CachedHandleStrategy {
    fn name(&self) -> &'static str {
        "cached"
    }

    async fn resolve(
        &self,
        descriptor: &MediaDescriptor,
        _request: &ResolveRequest,
    ) -> Result<Option<Resolution>, MediaError> {
        Ok(self.store.get(&descriptor.key).map(|handle| Resolution {
            handle,
            kind: descriptor.kind,
            source: HandleSource::Cached,
        }))
    }
}

/// What the leading upload of a key ended with, as seen by callers that joined it.
#[derive(Debug, Clone)]
enum UploadOutcome {
    Ready(MediaHandle),
    NotConfigured,
    Failed(String),
}

type OutcomeReceiver = watch::Receiver<Option<UploadOutcome>>;

enum Flight<'a> {
    Leader(watch::Sender<Option<UploadOutcome>>, FlightGuard<'a>),
    Waiter(OutcomeReceiver),
}

/// Uploads currently running, keyed by media key.
#[derive(Default)]
struct InFlightUploads {
    uploads: Mutex<HashMap<MediaKey, OutcomeReceiver>>,
}

impl InFlightUploads {
    /// The first caller for a key leads; later callers wait for its outcome.
    fn join(&self, key: &MediaKey) -> Flight<'_> {
        let mut uploads = self.uploads.lock();
        if let Some(receiver) = uploads.get(key) {
            return Flight::Waiter(receiver.clone());
        }
        let (sender, receiver) = watch::channel(None);
        uploads.insert(key.clone(), receiver);
        Flight::Leader(
            sender,
            FlightGuard {
                uploads: self,
                key: key.clone(),
            },
        )
    }
}

/// Unregisters the leader's flight, also when its future is dropped mid-upload.
struct FlightGuard<'a> {
    uploads: &'a InFlightUploads,
    key: MediaKey,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.uploads.uploads.lock().remove(&self.key);
    }
}

/// Uploads assets that have no handle yet.
///
/// Resolutions of the same key are collapsed: one caller uploads and the others
/// receive its outcome, success or failure, without uploading themselves.
pub struct UploadStrategy {
    store: Arc<HandleStore>,
    pipeline: Arc<UploadPipeline>,
    transport: Arc<dyn MediaTransport>,
    in_flight: InFlightUploads,
}

impl UploadStrategy {
    pub fn new(
        store: Arc<HandleStore>,
        pipeline: Arc<UploadPipeline>,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        Self {
            store,
            pipeline,
            transport,
            in_flight: InFlightUploads::default(),
        }
    }

    async fn lead(
        &self,
        descriptor: &MediaDescriptor,
        request: &ResolveRequest,
    ) -> Result<Resolution, MediaError> {
        if let Some(handle) = self.store.get(&descriptor.key) {
            debug!("{} was uploaded by an earlier resolution", descriptor.key);
            return Ok(Resolution {
                handle,
                kind: descriptor.kind,
                source: HandleSource::Cached,
            });
        }

        if !self.store.exists(descriptor) {
            return Err(MediaError::AssetNotConfigured(descriptor.key.clone()));
        }

        if let Some(notice) = &request.upload_notice {
            if let Err(err) = self.transport.send_text(request.chat_id, notice).await {
                warn!("Failed to send upload notice to chat {}: {err}", request.chat_id);
            }
        }

        info!("Uploading {} (first time), will cache file id", descriptor.key);
        let handle = self.pipeline.upload(descriptor, request.chat_id).await?;
        Ok(Resolution {
            handle,
            kind: descriptor.kind,
            source: HandleSource::Uploaded,
        })
    }

    async fn wait(
        &self,
        descriptor: &MediaDescriptor,
        mut receiver: OutcomeReceiver,
    ) -> Result<Resolution, MediaError> {
        debug!("Waiting for the running upload of {}", descriptor.key);
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map(|outcome| (*outcome).clone())
            .ok()
            .flatten();

        match outcome {
            Some(UploadOutcome::Ready(handle)) => Ok(Resolution {
                handle,
                kind: descriptor.kind,
                source: HandleSource::Cached,
            }),
            Some(UploadOutcome::NotConfigured) => {
                Err(MediaError::AssetNotConfigured(descriptor.key.clone()))
            }
            Some(UploadOutcome::Failed(reason)) => {
                Err(MediaError::upload_failed(&descriptor.key, reason))
            }
            None => Err(MediaError::upload_failed(
                &descriptor.key,
                "concurrent upload was abandoned",
            )),
        }
    }
}

#[async_trait]
impl ResolutionStrategy for UploadStrategy {
    fn name(&self) -> &'static str {
        "upload"
    }

    async fn resolve(
        &self,
        descriptor: &MediaDescriptor,
        request: &ResolveRequest,
    ) -> Result<Option<Resolution>, MediaError> {
        let (sender, guard) = match self.in_flight.join(&descriptor.key) {
            Flight::Leader(sender, guard) => (sender, guard),
            Flight::Waiter(receiver) => return self.wait(descriptor, receiver).await.map(Some),
        };

        let result = self.lead(descriptor, request).await;
        let outcome = match &result {
            Ok(resolution) => UploadOutcome::Ready(resolution.handle.clone()),
            Err(MediaError::AssetNotConfigured(_)) => UploadOutcome::NotConfigured,
            Err(MediaError::UploadFailed { reason, .. }) => UploadOutcome::Failed(reason.clone()),
            Err(err) => UploadOutcome::Failed(err.to_string()),
        };
        sender.send_replace(Some(outcome));
        drop(guard);

        result.map(Some)
    }
}

/// Resolves media keys to handles by walking an ordered list of strategies.
pub struct MediaResolver {
    strategies: Vec<Box<dyn ResolutionStrategy>>,
}

impl MediaResolver {
    pub fn new(strategies: Vec<Box<dyn ResolutionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Static handles, then the persisted cache, then a one-time upload.
    pub fn standard(
        static_handles: Arc<StaticHandles>,
        store: Arc<HandleStore>,
        transport: Arc<dyn MediaTransport>,
    ) -> Self {
        let pipeline = Arc::new(UploadPipeline::new(
            Arc::clone(&transport),
            Arc::clone(&store),
        ));
        Self::new(vec![
            Box::new(StaticHandleStrategy::new(static_handles)),
            Box::new(CachedHandleStrategy::new(Arc::clone(&store))),
            Box::new(UploadStrategy::new(store, pipeline, transport)),
        ])
    }

    pub async fn resolve(
        &self,
        descriptor: &MediaDescriptor,
        request: &ResolveRequest,
    ) -> Result<Resolution, MediaError> {
        for strategy in &self.strategies {
            if let Some(resolution) = strategy.resolve(descriptor, request).await? {
                debug!(
                    "Resolved {} via {} strategy",
                    descriptor.key,
                    strategy.name()
                );
                return Ok(resolution);
            }
        }
        Err(MediaError::AssetNotConfigured(descriptor.key.clone()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::media::store::FileHandleBackend;
    use anyhow::{anyhow, Result};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Transport fake that counts calls and can be told to fail uploads for some files.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub uploads: AtomicUsize,
        pub texts: AtomicUsize,
        pub active_uploads: AtomicUsize,
        pub max_active_uploads: AtomicUsize,
        pub upload_delay: Duration,
        pub failing_files: Vec<String>,
    }

    #[async_trait]
    impl MediaTransport for RecordingTransport {
        async fn send_text(&self, _chat_id: i64, _text: &str) -> Result<()> {
            self.texts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn send_media(
            &self,
            _chat_id: i64,
            _handle: &MediaHandle,
            _kind: MediaKind,
        ) -> Result<()> {
            Ok(())
        }

        async fn upload_media(
            &self,
            _chat_id: i64,
            _bytes: Vec<u8>,
            file_name: &str,
            _kind: MediaKind,
        ) -> Result<Option<MediaHandle>> {
            let number = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
            let active = self.active_uploads.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active_uploads.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.upload_delay).await;
            self.active_uploads.fetch_sub(1, Ordering::SeqCst);

            if self.failing_files.iter().any(|name| name == file_name) {
                return Err(anyhow!("upload of {file_name} rejected"));
            }
            Ok(Some(MediaHandle::new(format!("H{number}"))))
        }
    }

    pub(crate) struct Harness {
        pub dir: TempDir,
        pub store: Arc<HandleStore>,
        pub transport: Arc<RecordingTransport>,
    }

    impl Harness {
        pub fn new(transport: RecordingTransport) -> Self {
            Self::with_cache(transport, "")
        }

        pub fn with_cache(transport: RecordingTransport, cache: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("file-id-cache.properties");
            if !cache.is_empty() {
                fs::write(&path, cache).unwrap();
            }
            let store = Arc::new(HandleStore::open(Arc::new(FileHandleBackend::new(path))));
            Self {
                dir,
                store,
                transport: Arc::new(transport),
            }
        }

        pub fn asset(&self, key: &str) -> MediaDescriptor {
            let location = self.dir.path().join(key);
            if let Some(parent) = location.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&location, b"media-bytes").unwrap();
            self.descriptor(key)
        }

        pub fn descriptor(&self, key: &str) -> MediaDescriptor {
            MediaDescriptor::new(MediaKey::new(key), self.dir.path()).unwrap()
        }

        pub fn resolver(&self, statics: StaticHandles) -> MediaResolver {
            MediaResolver::standard(
                Arc::new(statics),
                Arc::clone(&self.store),
                self.transport.clone(),
            )
        }

        pub fn uploads(&self) -> usize {
            self.transport.uploads.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn first_resolution_uploads_once_and_caches() {
        let harness = Harness::new(RecordingTransport::default());
        let descriptor = harness.asset("congrats.mp4");
        let resolver = harness.resolver(StaticHandles::default());

        let resolution = resolver
            .resolve(&descriptor, &ResolveRequest::silent(7))
            .await
            .unwrap();

        assert_eq!(harness.uploads(), 1);
        assert_eq!(resolution.handle, MediaHandle::new("H1"));
        assert_eq!(resolution.kind, MediaKind::Video);
        assert!(resolution.already_delivered());
        assert_eq!(harness.store.get(&descriptor.key), Some(MediaHandle::new("H1")));
    }

    #[tokio::test]
    async fn cached_handle_is_reused_without_uploading() {
        let harness = Harness::new(RecordingTransport::default());
        let descriptor = harness.asset("congrats.mp4");
        let resolver = harness.resolver(StaticHandles::default());

        let first = resolver
            .resolve(&descriptor, &ResolveRequest::silent(7))
            .await
            .unwrap();
        let second = resolver
            .resolve(&descriptor, &ResolveRequest::silent(7))
            .await
            .unwrap();
        let third = resolver
            .resolve(&descriptor, &ResolveRequest::silent(7))
            .await
            .unwrap();

        assert_eq!(harness.uploads(), 1);
        assert_eq!(second.source, HandleSource::Cached);
        assert_eq!(second.handle, first.handle);
        assert_eq!(third.handle, first.handle);
    }

    #[tokio::test]
    async fn persisted_entry_short_circuits_upload() {
        let harness = Harness::with_cache(RecordingTransport::default(), "congrats.mp4=H1\n");
        let descriptor = harness.asset("congrats.mp4");
        let resolver = harness.resolver(StaticHandles::default());

        let resolution = resolver
            .resolve(&descriptor, &ResolveRequest::silent(7))
            .await
            .unwrap();

        assert_eq!(harness.uploads(), 0);
        assert_eq!(resolution.handle, MediaHandle::new("H1"));
        assert_eq!(resolution.source, HandleSource::Cached);
    }

    #[tokio::test]
    async fn static_handle_wins_over_cache() {
        let harness = Harness::with_cache(RecordingTransport::default(), "congrats.mp4=H1\n");
        let descriptor = harness.asset("congrats.mp4");
        let resolver = harness.resolver(StaticHandles::new([(
            MediaKey::new("congrats.mp4"),
            MediaHandle::new("STATIC"),
        )]));

        let resolution = resolver
            .resolve(&descriptor, &ResolveRequest::silent(7))
            .await
            .unwrap();

        assert_eq!(resolution.handle, MediaHandle::new("STATIC"));
        assert_eq!(resolution.source, HandleSource::Static);
        assert_eq!(harness.uploads(), 0);
    }

    #[tokio::test]
    async fn static_handle_needs_no_local_asset() {
        let harness = Harness::new(RecordingTransport::default());
        let descriptor = harness.descriptor("media/absent.png");
        let resolver = harness.resolver(StaticHandles::new([(
            MediaKey::new("media/absent.png"),
            MediaHandle::new("STATIC"),
        )]));

        let resolution = resolver
            .resolve(&descriptor, &ResolveRequest::silent(7))
            .await
            .unwrap();
        assert_eq!(resolution.kind, MediaKind::Image);
        assert_eq!(resolution.source, HandleSource::Static);
    }

    #[tokio::test]
    async fn blank_static_handle_is_ignored() {
        let harness = Harness::with_cache(RecordingTransport::default(), "congrats.mp4=H1\n");
        let descriptor = harness.asset("congrats.mp4");
        let resolver = harness.resolver(StaticHandles::new([(
            MediaKey::new("congrats.mp4"),
            MediaHandle::new(""),
        )]));

        let resolution = resolver
            .resolve(&descriptor, &ResolveRequest::silent(7))
            .await
            .unwrap();
        assert_eq!(resolution.source, HandleSource::Cached);
    }

    #[tokio::test]
    async fn missing_asset_is_not_configured() {
        let harness = Harness::new(RecordingTransport::default());
        let descriptor = harness.descriptor("media/absent.mov");
        let resolver = harness.resolver(StaticHandles::default());

        let result = resolver
            .resolve(&descriptor, &ResolveRequest::with_notice(7, "uploading"))
            .await;

        assert!(matches!(result, Err(MediaError::AssetNotConfigured(_))));
        assert_eq!(harness.uploads(), 0);
        assert_eq!(harness.transport.texts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upload_notice_is_sent_before_first_upload_only() {
        let harness = Harness::new(RecordingTransport::default());
        let descriptor = harness.asset("congrats.mp4");
        let resolver = harness.resolver(StaticHandles::default());
        let request = ResolveRequest::with_notice(7, "Uploading video, please wait...");

        resolver.resolve(&descriptor, &request).await.unwrap();
        resolver.resolve(&descriptor, &request).await.unwrap();

        assert_eq!(harness.transport.texts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_upload_leaves_cache_empty() {
        let harness = Harness::new(RecordingTransport {
            failing_files: vec!["broken.mp4".to_string()],
            ..Default::default()
        });
        let descriptor = harness.asset("broken.mp4");
        let resolver = harness.resolver(StaticHandles::default());

        let result = resolver
            .resolve(&descriptor, &ResolveRequest::silent(7))
            .await;

        assert!(matches!(result, Err(MediaError::UploadFailed { .. })));
        assert!(harness.store.get(&descriptor.key).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolutions_of_one_key_upload_once() {
        let harness = Harness::new(RecordingTransport {
            upload_delay: Duration::from_millis(50),
            ..Default::default()
        });
        let descriptor = harness.asset("congrats.mp4");
        let resolver = Arc::new(harness.resolver(StaticHandles::default()));

        let mut tasks = Vec::new();
        for chat_id in 0..5 {
            let resolver = Arc::clone(&resolver);
            let descriptor = descriptor.clone();
            tasks.push(tokio::spawn(async move {
                resolver
                    .resolve(&descriptor, &ResolveRequest::silent(chat_id))
                    .await
            }));
        }

        let mut handles = Vec::new();
        let mut delivered = 0;
        for task in tasks {
            let resolution = task.await.unwrap().unwrap();
            if resolution.already_delivered() {
                delivered += 1;
            }
            handles.push(resolution.handle);
        }

        assert_eq!(harness.uploads(), 1);
        assert_eq!(delivered, 1);
        assert!(handles.iter().all(|handle| handle == &handles[0]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolutions_share_a_failed_upload() {
        let harness = Harness::new(RecordingTransport {
            upload_delay: Duration::from_millis(100),
            failing_files: vec!["congrats.mp4".to_string()],
            ..Default::default()
        });
        let descriptor = harness.asset("congrats.mp4");
        let resolver = Arc::new(harness.resolver(StaticHandles::default()));

        let mut tasks = Vec::new();
        for chat_id in 0..5 {
            let resolver = Arc::clone(&resolver);
            let descriptor = descriptor.clone();
            tasks.push(tokio::spawn(async move {
                resolver
                    .resolve(
                        &descriptor,
                        &ResolveRequest::with_notice(chat_id, "uploading"),
                    )
                    .await
            }));
        }

        for task in tasks {
            let result = task.await.unwrap();
            assert!(matches!(result, Err(MediaError::UploadFailed { .. })));
        }
        assert_eq!(harness.uploads(), 1);
        assert_eq!(harness.transport.texts.load(Ordering::SeqCst), 1);
        assert!(harness.store.get(&descriptor.key).is_none());

        let retry = resolver
            .resolve(&descriptor, &ResolveRequest::silent(9))
            .await;
        assert!(retry.is_err());
        assert_eq!(harness.uploads(), 2);
    }

    struct NeverStrategy;

    #[async_trait]
    impl ResolutionStrategy for NeverStrategy {
        fn name(&self) -> &'static str {
            "never"
        }

        async fn resolve(
            &self,
            _descriptor: &MediaDescriptor,
            _request: &ResolveRequest,
        ) -> Result<Option<Resolution>, MediaError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn exhausted_chain_reports_not_configured() {
        let harness = Harness::new(RecordingTransport::default());
        let descriptor = harness.asset("congrats.mp4");
        let resolver = MediaResolver::new(vec![Box::new(NeverStrategy)]);

        let result = resolver
            .resolve(&descriptor, &ResolveRequest::silent(1))
            .await;
        assert!(matches!(result, Err(MediaError::AssetNotConfigured(_))));
    }
}
