//! Opt-in instrumentation hooks over an [`EventCollector`].
//!
//! Hosts that want automatic events install an [`Instrumentation`] handle and
//! route their lifecycle signals through it: navigation, interactions,
//! captured errors, outgoing requests, and teardown. Nothing is patched or
//! intercepted globally; every hook is an explicit call, and each event kind
//! honors its [`AutoTrackConfig`](crate::config::AutoTrackConfig) toggle.
//!
//! Install is idempotent per collector: the second caller gets `None` and the
//! existing handle keeps working. Destroying the collector releases the
//! installation.

use crate::{
    collector::EventCollector,
    event::{ErrorContext, EventKind, InteractionContext, NetworkContext, PageContext},
};
use std::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct PageVisit {
    path: String,
    entered_at: Instant,
}

/// Instrumentation hooks bound to one collector.
pub struct Instrumentation {
    collector: EventCollector,
    current_page: Mutex<Option<PageVisit>>,
}

impl Instrumentation {
    /// Installs instrumentation on the collector.
    ///
    /// Returns `None` when hooks are already installed; the second install is
    /// a complete no-op and does not duplicate any events.
    pub fn install(collector: &EventCollector) -> Option<Self> {
        if !collector.try_install_hooks() {
            debug!("Instrumentation already installed, ignoring");
            return None;
        }
        Some(Self {
            collector: collector.clone(),
            current_page: Mutex::new(None),
        })
    }

    /// Records entry to a page.
    ///
    /// Closes the previous page with a page-leave event (carrying dwell
    /// time), then emits a page-view for the new page with the previous path
    /// as referrer.
    pub async fn page_enter(&self, path: impl Into<String>, title: Option<String>) {
        let path = path.into();
        let referrer = self.close_current_page().await;

        if !self.collector.auto_track().page_views {
            return;
        }
        let event = self
            .collector
            .new_event(EventKind::PageView)
            .with_page(PageContext {
                path: path.clone(),
                title,
                duration_ms: None,
                referrer,
            });
        if let Ok(mut current) = self.current_page.lock() {
            *current = Some(PageVisit {
                path,
                entered_at: Instant::now(),
            });
        }
        self.collector.submit(event).await;
    }

    /// Records leaving the current page, emitting dwell time.
    pub async fn page_leave(&self) {
        self.close_current_page().await;
    }

    /// Records a click, link-click, or form-submit interaction.
    ///
    /// Other kinds are rejected; interaction context only makes sense on
    /// interaction events.
    pub async fn record_interaction(&self, kind: EventKind, interaction: InteractionContext) {
        if !matches!(
            kind,
            EventKind::Click | EventKind::LinkClick | EventKind::FormSubmit
        ) {
            debug!(%kind, "Ignoring non-interaction kind");
            return;
        }
        if !self.collector.auto_track().clicks {
            return;
        }
        let mut event = self
            .collector
            .new_event(kind)
            .with_interaction(interaction);
        if let Some(path) = self.current_path() {
            event = event.with_page(PageContext {
                path,
                ..PageContext::default()
            });
        }
        self.collector.submit(event).await;
    }

    /// Records a captured error or rejection.
    pub async fn record_error(&self, error: ErrorContext) {
        if !self.collector.auto_track().errors {
            return;
        }
        let event = self.collector.new_event(EventKind::Error).with_error(error);
        self.collector.submit(event).await;
    }

    /// Wraps one outgoing request, emitting an api-request event with the
    /// observed latency and status. The request outcome passes through
    /// untouched; instrumentation never alters what the caller sees.
    pub async fn traced_request<F>(
        &self,
        method: impl Into<String>,
        url: impl Into<String>,
        request: F,
    ) -> Result<reqwest::Response, reqwest::Error>
    where
        F: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let started = Instant::now();
        let outcome = request.await;

        if self.collector.auto_track().api_requests {
            let status = outcome.as_ref().ok().map(|r| r.status().as_u16());
            let event = self
                .collector
                .new_event(EventKind::ApiRequest)
                .with_network(NetworkContext {
                    url: url.into(),
                    method: method.into(),
                    response_time_ms: Some(started.elapsed().as_millis() as u64),
                    status,
                });
            self.collector.submit(event).await;
        }
        outcome
    }

    /// Teardown hook: closes the current page, then drains everything still
    /// queued over the fire-and-forget path so nothing blocks unload.
    pub async fn unload(&self) {
        self.close_current_page().await;
        self.collector.drain_for_unload();
    }

    fn current_path(&self) -> Option<String> {
        self.current_page
            .lock()
            .ok()
            .and_then(|current| current.as_ref().map(|v| v.path.clone()))
    }

    async fn close_current_page(&self) -> Option<String> {
        let visit = self
            .current_page
            .lock()
            .ok()
            .and_then(|mut current| current.take())?;

        if self.collector.auto_track().page_leave {
            let event = self
                .collector
                .new_event(EventKind::PageLeave)
                .with_page(PageContext {
                    path: visit.path.clone(),
                    title: None,
                    duration_ms: Some(visit.entered_at.elapsed().as_millis() as u64),
                    referrer: None,
                });
            self.collector.submit(event).await;
        }
        Some(visit.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AutoTrackConfig, CollectorConfig};
    use crate::session::MemorySessionStore;
    use crate::snapshot::MemorySnapshotStore;
    use crate::transport::{Transport, TransportError};
    use crate::event::UserEvent;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send_batch(&self, _: &[UserEvent]) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_fire_and_forget(&self, _: Vec<UserEvent>) {}
    }

    fn collector(auto_track: AutoTrackConfig) -> EventCollector {
        EventCollector::new(
            CollectorConfig::default()
                .with_batch_size(1000)
                .with_auto_track(auto_track),
            Arc::new(NullTransport),
            Arc::new(MemorySnapshotStore::new()),
            Arc::new(MemorySessionStore::new()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_second_install_is_noop() {
        let collector = collector(AutoTrackConfig::default());
        let first = Instrumentation::install(&collector);
        assert!(first.is_some());
        assert!(Instrumentation::install(&collector).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_emits_leave_with_dwell_time() {
        let collector = collector(AutoTrackConfig::default());
        let hooks = Instrumentation::install(&collector).unwrap();

        hooks.page_enter("/home", Some("Home".to_string())).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        hooks.page_enter("/jobs", None).await;

        // page_view(/home), page_leave(/home, 5000ms), page_view(/jobs)
        assert_eq!(collector.queue_len(), 3);
        let session = collector.session_info();
        assert_eq!(session.page_view_count, 2);
    }

    #[tokio::test]
    async fn test_disabled_toggles_suppress_events() {
        let collector = collector(AutoTrackConfig {
            page_views: false,
            clicks: false,
            errors: false,
            api_requests: false,
            page_leave: false,
        });
        let hooks = Instrumentation::install(&collector).unwrap();

        hooks.page_enter("/home", None).await;
        hooks
            .record_interaction(EventKind::Click, InteractionContext::default())
            .await;
        hooks
            .record_error(ErrorContext {
                message: "boom".to_string(),
                ..ErrorContext::default()
            })
            .await;

        assert_eq!(collector.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_interaction_rejects_non_interaction_kinds() {
        let collector = collector(AutoTrackConfig::default());
        let hooks = Instrumentation::install(&collector).unwrap();

        hooks
            .record_interaction(EventKind::Error, InteractionContext::default())
            .await;
        assert_eq!(collector.queue_len(), 0);

        hooks
            .record_interaction(
                EventKind::FormSubmit,
                InteractionContext {
                    element_id: Some("signup".to_string()),
                    ..InteractionContext::default()
                },
            )
            .await;
        assert_eq!(collector.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_unload_drains_queue() {
        let collector = collector(AutoTrackConfig::default());
        let hooks = Instrumentation::install(&collector).unwrap();

        hooks.page_enter("/home", None).await;
        hooks.unload().await;
        assert_eq!(collector.queue_len(), 0);
    }
}
