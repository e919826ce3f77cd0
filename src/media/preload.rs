use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::media::descriptor::MediaDescriptor;
use crate::media::resolver::{MediaResolver, ResolveRequest, StaticHandles};
use crate::media::store::HandleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreloadState {
    NotStarted,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy)]
pub struct PreloadSettings {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for PreloadSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreloadReport {
    pub scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

/// Populates the handle cache ahead of user traffic using a bounded worker pool.
pub struct PreloadOrchestrator {
    resolver: Arc<MediaResolver>,
    store: Arc<HandleStore>,
    static_handles: Arc<StaticHandles>,
    settings: PreloadSettings,
    state: Mutex<PreloadState>,
}

impl PreloadOrchestrator {
    pub fn new(
        resolver: Arc<MediaResolver>,
        store: Arc<HandleStore>,
        static_handles: Arc<StaticHandles>,
        settings: PreloadSettings,
    ) -> Self {
        Self {
            resolver,
            store,
            static_handles,
            settings,
            state: Mutex::new(PreloadState::NotStarted),
        }
    }

    pub fn state(&self) -> PreloadState {
        *self.state.lock()
    }

    /// Descriptors with a local asset and neither a static nor a cached handle.
    pub fn eligible(&self, descriptors: &[MediaDescriptor]) -> Vec<MediaDescriptor> {
        descriptors
            .iter()
            .filter(|descriptor| !self.static_handles.contains(&descriptor.key))
            .filter(|descriptor| !self.store.has_handle(&descriptor.key))
            .filter(|descriptor| self.store.exists(descriptor))
            .cloned()
            .collect()
    }

    /// Resolves every eligible descriptor, uploading to `chat_id`, and waits for all of them.
    ///
    /// Failures are logged per unit and never cancel the remaining work.
    pub async fn preload(&self, descriptors: &[MediaDescriptor], chat_id: i64) -> PreloadReport {
        {
            let mut state = self.state.lock();
            if *state == PreloadState::Running {
                warn!("Media preload already running, ignoring second request");
                return PreloadReport::default();
            }
            *state = PreloadState::Running;
        }

        let started = Instant::now();
        let eligible = self.eligible(descriptors);
        let skipped = descriptors.len() - eligible.len();
        let scheduled = eligible.len();
        let workers = self.settings.workers.max(1).min(scheduled.max(1));

        info!(
            "Starting media preload: {} scheduled, {} skipped, {} worker(s)",
            scheduled, skipped, workers
        );

        let succeeded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = mpsc::channel::<MediaDescriptor>(self.settings.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let receiver = Arc::clone(&receiver);
            let resolver = Arc::clone(&self.resolver);
            let succeeded = Arc::clone(&succeeded);
            let failed = Arc::clone(&failed);
            pool.spawn(async move {
                let request = ResolveRequest::silent(chat_id);
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(descriptor) = next else {
                        break;
                    };
                    match resolver.resolve(&descriptor, &request).await {
                        Ok(resolution) => {
                            succeeded.fetch_add(1, Ordering::SeqCst);
                            info!(
                                "Preloaded {} on worker {}, file id: {}",
                                descriptor.key, worker_id, resolution.handle
                            );
                        }
                        Err(err) => {
                            failed.fetch_add(1, Ordering::SeqCst);
                            warn!("Failed to preload {}: {err}", descriptor.key);
                        }
                    }
                }
            });
        }

        for descriptor in eligible {
            if sender.send(descriptor).await.is_err() {
                error!("Media preload workers stopped before the queue was drained");
                break;
            }
        }
        drop(sender);

        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                error!("Media preload worker panicked: {err}");
            }
        }

        let report = PreloadReport {
            scheduled,
            succeeded: succeeded.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
            skipped,
            elapsed: started.elapsed(),
        };
        *self.state.lock() = PreloadState::Completed;

        info!(
            target: "bot.timing",
            "event=preload_completed scheduled={} succeeded={} failed={} skipped={} duration_s={:.3}",
            report.scheduled,
            report.succeeded,
            report.failed,
            report.skipped,
            report.elapsed.as_secs_f64()
        );
        report
    }
}

#[derive(Debug, Clone)]
pub struct PreloadOptions {
    pub enabled: bool,
    pub chat_id: Option<i64>,
    pub delay: Duration,
}

/// Startup entry point: honours the enable flag and delay, then runs the preload.
pub async fn run_startup_preload(
    orchestrator: Arc<PreloadOrchestrator>,
    descriptors: Vec<MediaDescriptor>,
    options: PreloadOptions,
) -> Option<PreloadReport> {
    if !options.enabled {
        info!("Media preload disabled");
        return None;
    }

    tokio::time::sleep(options.delay).await;

    let Some(chat_id) = options.chat_id else {
        warn!("PRELOAD_CHAT_ID not set, skipping media preload. Send /start to the bot to find your chat id.");
        return None;
    };

    let report = orchestrator.preload(&descriptors, chat_id).await;
    info!(
        "Media preload {:?} in {} ms: {} succeeded, {} failed, {} skipped",
        orchestrator.state(),
        report.elapsed.as_millis(),
        report.succeeded,
        report.failed,
        report.skipped
    );
    Some(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::descriptor::{MediaHandle, MediaKey};
    use crate::media::resolver::tests::{Harness, RecordingTransport};

    fn orchestrator(
        harness: &Harness,
        statics: StaticHandles,
        workers: usize,
    ) -> PreloadOrchestrator {
        let statics = Arc::new(statics);
        let resolver = Arc::new(MediaResolver::standard(
            Arc::clone(&statics),
            Arc::clone(&harness.store),
            harness.transport.clone(),
        ));
        PreloadOrchestrator::new(
            resolver,
            Arc::clone(&harness.store),
            statics,
            PreloadSettings {
                workers,
                queue_capacity: 1,
            },
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bounded_pool_runs_every_unit_and_tolerates_failure() {
        let harness = Harness::new(RecordingTransport {
            upload_delay: Duration::from_millis(40),
            failing_files: vec!["c.mp4".to_string()],
            ..Default::default()
        });
        let descriptors: Vec<_> = ["a.mp4", "b.png", "c.mp4", "d.mov", "e.jpg"]
            .iter()
            .map(|key| harness.asset(key))
            .collect();
        let orchestrator = orchestrator(&harness, StaticHandles::default(), 2);
        assert_eq!(orchestrator.state(), PreloadState::NotStarted);

        let report = orchestrator.preload(&descriptors, 99).await;

        assert_eq!(orchestrator.state(), PreloadState::Completed);
        assert_eq!(report.scheduled, 5);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(harness.uploads(), 5);
        assert!(harness.transport.max_active_uploads.load(Ordering::SeqCst) <= 2);
        assert!(harness.store.get(&MediaKey::new("c.mp4")).is_none());
        assert!(harness.store.get(&MediaKey::new("d.mov")).is_some());
    }

    #[tokio::test]
    async fn skips_static_cached_and_missing_assets() {
        let harness = Harness::with_cache(RecordingTransport::default(), "cached.mp4=H0\n");
        let descriptors = vec![
            harness.asset("cached.mp4"),
            harness.asset("static.mp4"),
            harness.descriptor("missing.mp4"),
            harness.asset("fresh.mp4"),
        ];
        let orchestrator = orchestrator(
            &harness,
            StaticHandles::new([(MediaKey::new("static.mp4"), MediaHandle::new("S1"))]),
            2,
        );

        let eligible = orchestrator.eligible(&descriptors);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].key, MediaKey::new("fresh.mp4"));

        let report = orchestrator.preload(&descriptors, 1).await;
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(harness.uploads(), 1);
        assert!(harness.store.get(&MediaKey::new("static.mp4")).is_none());
    }

    #[tokio::test]
    async fn empty_run_still_completes() {
        let harness = Harness::new(RecordingTransport::default());
        let orchestrator = orchestrator(&harness, StaticHandles::default(), 2);

        let report = orchestrator.preload(&[], 1).await;
        assert_eq!(report.scheduled, 0);
        assert_eq!(orchestrator.state(), PreloadState::Completed);
    }

    #[tokio::test]
    async fn second_run_only_retries_what_failed() {
        let harness = Harness::new(RecordingTransport {
            failing_files: vec!["bad.mp4".to_string()],
            ..Default::default()
        });
        let descriptors = vec![harness.asset("good.mp4"), harness.asset("bad.mp4")];
        let orchestrator = orchestrator(&harness, StaticHandles::default(), 1);

        orchestrator.preload(&descriptors, 1).await;
        let report = orchestrator.preload(&descriptors, 1).await;

        assert_eq!(report.scheduled, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(harness.uploads(), 3);
    }

    #[tokio::test]
    async fn startup_runner_respects_flag_and_target() {
        let harness = Harness::new(RecordingTransport::default());
        let descriptors = vec![harness.asset("a.mp4")];
        let orchestrator = Arc::new(orchestrator(&harness, StaticHandles::default(), 1));

        let disabled = run_startup_preload(
            Arc::clone(&orchestrator),
            descriptors.clone(),
            PreloadOptions {
                enabled: false,
                chat_id: Some(1),
                delay: Duration::ZERO,
            },
        )
        .await;
        assert!(disabled.is_none());

        let no_target = run_startup_preload(
            Arc::clone(&orchestrator),
            descriptors.clone(),
            PreloadOptions {
                enabled: true,
                chat_id: None,
                delay: Duration::ZERO,
            },
        )
        .await;
        assert!(no_target.is_none());
        assert_eq!(orchestrator.state(), PreloadState::NotStarted);

        let report = run_startup_preload(
            Arc::clone(&orchestrator),
            descriptors,
            PreloadOptions {
                enabled: true,
                chat_id: Some(1),
                delay: Duration::from_millis(5),
            },
        )
        .await
        .unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(orchestrator.state(), PreloadState::Completed);
    }
}
