//! Minecraft to Discord chat bridge.
//!
//! A [`Bridge`] owns everything the relay needs: the log source, the Discord sink,
//! the seen-log store and the poll task. `active` is the operator's intent and is
//! checked on every tick; the poll task is the scheduler state. They are tracked
//! separately because they can legitimately disagree, e.g. after the API rejects
//! the token the task keeps running but `active` is false.

pub mod classifier;
pub mod seen;
pub mod sink;
pub mod source;

use crate::config::Config;
use classifier::{classify, LogEvent};
use seen::{SeenLog, SharedSeenLog, StateWriter};
use serenity::all::ChannelId;
use serenity::http::Http;
use sink::{DiscordSink, EventSink};
use source::{FetchError, HttpLogSource, LogSource};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("no destination channel is configured (set MC_CHAT_CHANNEL_ID or use `set-channel`)")]
    ChannelNotConfigured,
    #[error("the log API is not configured (set MC_LOG_API_URL and MC_LOG_API_TOKEN)")]
    ApiNotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Started,
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableOutcome {
    Stopped,
    AlreadyInactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Inactive,
    ApiNotConfigured,
    ChannelNotConfigured,
}

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub received: usize,
    pub duplicates: usize,
    pub delivered: usize,
    pub unclassified: usize,
    pub failed_deliveries: usize,
}

#[derive(Debug)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Processed(BatchReport),
    /// The API rejected the token; the bridge has been deactivated.
    AuthRejected,
    /// Any other fetch failure. The bridge stays active and retries next tick.
    Failed(FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeStatus {
    pub active: bool,
    pub task_running: bool,
    pub channel: Option<ChannelId>,
    pub api_configured: bool,
}

#[derive(Debug, Clone)]
pub struct BridgeDiagnostics {
    pub status: BridgeStatus,
    pub endpoint: Option<String>,
    pub session_open: bool,
    pub poll_interval: Duration,
    pub seen_entries: usize,
    pub state_path: PathBuf,
}

struct Pipeline {
    active: AtomicBool,
    channel: RwLock<Option<ChannelId>>,
    source: Option<Arc<dyn LogSource>>,
    sink: Arc<dyn EventSink>,
    seen: SharedSeenLog,
    writer: StateWriter,
    /// Held for a whole tick so two ticks never overlap, even across task restarts.
    in_flight: tokio::sync::Mutex<()>,
}

impl Pipeline {
    fn channel(&self) -> Option<ChannelId> {
        *self.channel.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn seen_has(&self, id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .has(id)
    }

    fn seen_add(&self, id: &str) {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(id);
    }

    async fn tick(&self) -> TickOutcome {
        let _flight = self.in_flight.lock().await;

        if !self.active.load(Ordering::SeqCst) {
            return TickOutcome::Skipped(SkipReason::Inactive);
        }
        let Some(source) = self.source.as_ref() else {
            return TickOutcome::Skipped(SkipReason::ApiNotConfigured);
        };
        let Some(channel) = self.channel() else {
            return TickOutcome::Skipped(SkipReason::ChannelNotConfigured);
        };

        let lines = match source.fetch_new_lines().await {
            Ok(lines) => lines,
            Err(e) if e.is_auth() => {
                error!("{}. Disabling the chat bridge until it is re-enabled.", e);
                self.active.store(false, Ordering::SeqCst);
                return TickOutcome::AuthRejected;
            }
            Err(e @ FetchError::NotFound(_)) => {
                error!("{}. Check MC_LOG_API_URL and the API deployment.", e);
                return TickOutcome::Failed(e);
            }
            Err(e @ FetchError::Timeout) => {
                warn!("{}", e);
                return TickOutcome::Failed(e);
            }
            Err(e) => {
                error!("{}", e);
                return TickOutcome::Failed(e);
            }
        };

        let mut report = BatchReport {
            received: lines.len(),
            ..Default::default()
        };

        for line in lines {
            let id = line.identifier();
            if self.seen_has(&id) {
                report.duplicates += 1;
                continue;
            }

            let event = classify(&line.content);
            debug!("Classified log line as {}: {:.100}", event.kind(), line.content);

            if let LogEvent::Unclassified { .. } = event {
                report.unclassified += 1;
            } else {
                match self.sink.deliver(channel, &event).await {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        error!(
                            "Failed to relay {} event to channel {}: {}",
                            event.kind(),
                            channel,
                            e
                        );
                        report.failed_deliveries += 1;
                    }
                }
            }

            self.seen_add(&id);
        }

        if report.received > report.duplicates {
            self.writer.request();
            info!(
                "Chat bridge batch: {} received, {} relayed, {} unclassified, {} duplicates, {} failed",
                report.received,
                report.delivered,
                report.unclassified,
                report.duplicates,
                report.failed_deliveries
            );
        }

        TickOutcome::Processed(report)
    }
}

struct PollTask {
    handle: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl PollTask {
    /// Running and not yet told to stop.
    fn is_live(&self) -> bool {
        !self.handle.is_finished() && !*self.stop.borrow()
    }
}

async fn run_poller(pipeline: Arc<Pipeline>, interval: Duration, mut stop: watch::Receiver<bool>) {
    info!("Chat bridge poll task started (every {:?})", interval);
    loop {
        if *stop.borrow() {
            break;
        }

        match pipeline.tick().await {
            TickOutcome::Skipped(reason) => debug!("Chat bridge tick skipped: {:?}", reason),
            TickOutcome::Processed(report) if report.received == 0 => {
                debug!("Chat bridge tick: no new lines")
            }
            _ => {}
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    info!("Chat bridge poll task stopped");
}

pub struct Bridge {
    pipeline: Arc<Pipeline>,
    poll_interval: Duration,
    task: tokio::sync::Mutex<Option<PollTask>>,
    writer_task: JoinHandle<()>,
}

impl Bridge {
    /// Build a bridge and start its background state writer.
    pub fn new(
        source: Option<Arc<dyn LogSource>>,
        sink: Arc<dyn EventSink>,
        seen: SeenLog,
        channel: Option<ChannelId>,
        poll_interval: Duration,
    ) -> Self {
        let seen: SharedSeenLog = Arc::new(Mutex::new(seen));
        let writer = StateWriter::new(seen.clone());
        let writer_task = writer.spawn();

        Self {
            pipeline: Arc::new(Pipeline {
                active: AtomicBool::new(false),
                channel: RwLock::new(channel),
                source,
                sink,
                seen,
                writer,
                in_flight: tokio::sync::Mutex::new(()),
            }),
            poll_interval,
            task: tokio::sync::Mutex::new(None),
            writer_task,
        }
    }

    pub fn from_config(config: &Config, http: Arc<Http>) -> Self {
        let source: Option<Arc<dyn LogSource>> =
            match (&config.log_api_url, &config.log_api_token) {
                (Some(url), Some(token)) => {
                    info!("Log API configured at {}", url);
                    Some(Arc::new(HttpLogSource::new(
                        url,
                        token,
                        Duration::from_secs(config.log_api_timeout_secs),
                    )) as Arc<dyn LogSource>)
                }
                _ => {
                    warn!("MC_LOG_API_URL or MC_LOG_API_TOKEN is not set; the chat bridge cannot be enabled.");
                    None
                }
            };

        if config.chat_channel_id.is_none() {
            warn!("MC_CHAT_CHANNEL_ID is not set; use `bridge set-channel` before enabling.");
        }

        let seen = SeenLog::load(
            &config.seen_state_path,
            config.seen_retention_days,
            config.seen_max_entries,
        );

        Self::new(
            source,
            Arc::new(DiscordSink::new(http)),
            seen,
            config.chat_channel_id.map(ChannelId::new),
            config.poll_interval,
        )
    }

    pub fn is_active(&self) -> bool {
        self.pipeline.active.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.pipeline.channel()
    }

    pub fn api_configured(&self) -> bool {
        self.pipeline.source.is_some()
    }

    /// Override the destination channel until the process exits.
    pub fn set_channel(&self, channel: ChannelId) {
        *self
            .pipeline
            .channel
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(channel);
        info!("Chat bridge destination set to channel {}", channel);
    }

    /// Whether the poll task exists and has not exited yet.
    pub async fn task_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub async fn status(&self) -> BridgeStatus {
        BridgeStatus {
            active: self.is_active(),
            task_running: self.task_running().await,
            channel: self.channel(),
            api_configured: self.api_configured(),
        }
    }

    pub async fn diagnostics(&self) -> BridgeDiagnostics {
        let (seen_entries, state_path) = {
            let seen = self
                .pipeline
                .seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            (seen.len(), seen.path().to_path_buf())
        };
        let source = self.pipeline.source.as_ref();
        BridgeDiagnostics {
            status: self.status().await,
            endpoint: source.and_then(|s| s.endpoint()).map(str::to_string),
            session_open: source.is_some_and(|s| s.session_open()),
            poll_interval: self.poll_interval,
            seen_entries,
            state_path,
        }
    }

    /// Preconditions that must hold before the bridge can be enabled.
    pub fn check_ready(&self) -> Result<ChannelId, BridgeError> {
        let channel = self.channel().ok_or(BridgeError::ChannelNotConfigured)?;
        if !self.api_configured() {
            return Err(BridgeError::ApiNotConfigured);
        }
        Ok(channel)
    }

    /// Mark the bridge active and start the poll task unless one is already live.
    pub async fn enable(&self) -> Result<EnableOutcome, BridgeError> {
        self.check_ready()?;

        let mut task = self.task.lock().await;
        self.pipeline.active.store(true, Ordering::SeqCst);
        if task.as_ref().is_some_and(PollTask::is_live) {
            info!("Chat bridge enable requested but the poll task is already running");
            return Ok(EnableOutcome::AlreadyActive);
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_poller(
            self.pipeline.clone(),
            self.poll_interval,
            stop_rx,
        ));
        *task = Some(PollTask { handle, stop });
        info!("Chat bridge enabled");
        Ok(EnableOutcome::Started)
    }

    /// Clear the active flag and stop the poll task. A tick already in progress
    /// finishes its batch before the task exits.
    pub async fn disable(&self) -> DisableOutcome {
        let task = self.task.lock().await;
        self.pipeline.active.store(false, Ordering::SeqCst);
        match task.as_ref() {
            Some(task) if task.is_live() => {
                let _ = task.stop.send(true);
                info!("Chat bridge disabled, poll task stopping");
                DisableOutcome::Stopped
            }
            _ => {
                debug!("Chat bridge disable requested but it was not running");
                DisableOutcome::AlreadyInactive
            }
        }
    }

    /// Run one poll cycle immediately.
    pub async fn tick(&self) -> TickOutcome {
        self.pipeline.tick().await
    }

    /// Stop polling, wait for the task to exit and persist the seen-log state.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.disable().await;
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            let _ = task.stop.send(true);
            if let Err(e) = task.handle.await {
                warn!("Chat bridge poll task ended abnormally: {}", e);
            }
        }
        self.pipeline.writer.flush().await?;
        info!("Chat bridge shut down, seen-log state flushed");
        Ok(())
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.writer_task.abort();
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(task) = task.take() {
                let _ = task.stop.send(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use httpmock::prelude::*;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(ChannelId, LogEvent)>>,
        fail: bool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn events(&self) -> Vec<LogEvent> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|(_, e)| e.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn deliver(&self, channel: ChannelId, event: &LogEvent) -> anyhow::Result<()> {
            self.events.lock().unwrap().push((channel, event.clone()));
            if self.fail {
                anyhow::bail!("Unknown Channel");
            }
            Ok(())
        }
    }

    struct Harness {
        bridge: Bridge,
        sink: Arc<RecordingSink>,
        temp: TempDir,
    }

    fn harness(base_url: Option<&str>, channel: Option<u64>, sink: RecordingSink) -> Harness {
        harness_with_state(base_url, channel, sink, |dir| dir.join("seen.json"))
    }

    fn harness_with_state(
        base_url: Option<&str>,
        channel: Option<u64>,
        sink: RecordingSink,
        state_path: impl FnOnce(&std::path::Path) -> PathBuf,
    ) -> Harness {
        let temp = tempdir().unwrap();
        let sink = Arc::new(sink);
        let source = base_url.map(|url| {
            Arc::new(HttpLogSource::new(url, "token", Duration::from_millis(300)))
                as Arc<dyn LogSource>
        });
        let seen = SeenLog::new(state_path(temp.path()), 7, 1000);
        let bridge = Bridge::new(
            source,
            sink.clone(),
            seen,
            channel.map(ChannelId::new),
            Duration::from_secs(3600),
        );
        Harness { bridge, sink, temp }
    }

    fn activate(bridge: &Bridge) {
        bridge.pipeline.active.store(true, Ordering::SeqCst);
    }

    fn batch() -> serde_json::Value {
        let recent = (chrono::Utc::now() - chrono::Duration::minutes(5)).timestamp().to_string();
        json!({
            "new_lines": [
                "[12:00:01] [Server thread/INFO]: <Steve> hello there",
                {"content": "[12:00:02] [Server thread/INFO]: Steve joined the game", "timestamp": recent},
                "[12:00:03] [Server thread/INFO]: Preparing spawn area: 42%",
                {"line": "[12:00:04] [Server thread/INFO]: Steve was slain by Zombie", "line_number": 4}
            ]
        })
    }

    #[tokio::test]
    async fn test_tick_relays_batch_in_order_once() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200).json_body(batch());
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());
        activate(&h.bridge);

        match h.bridge.tick().await {
            TickOutcome::Processed(report) => {
                assert_eq!(report.received, 4);
                assert_eq!(report.delivered, 3);
                assert_eq!(report.unclassified, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(
            h.sink.events(),
            vec![
                LogEvent::ChatMessage {
                    player: "Steve".to_string(),
                    text: "hello there".to_string()
                },
                LogEvent::PlayerJoined {
                    player: "Steve".to_string()
                },
                LogEvent::PlayerDeath {
                    message: "Steve was slain by Zombie".to_string()
                },
            ]
        );

        // Same batch again: nothing new is emitted.
        match h.bridge.tick().await {
            TickOutcome::Processed(report) => assert_eq!(report.duplicates, 4),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.sink.events().len(), 3);
        mock.assert_calls(2);
    }

    #[tokio::test]
    async fn test_inactive_or_unconfigured_tick_is_noop() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200).json_body(batch());
        });

        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());
        assert!(matches!(
            h.bridge.tick().await,
            TickOutcome::Skipped(SkipReason::Inactive)
        ));

        let no_api = harness(None, Some(10), RecordingSink::default());
        activate(&no_api.bridge);
        assert!(matches!(
            no_api.bridge.tick().await,
            TickOutcome::Skipped(SkipReason::ApiNotConfigured)
        ));
        mock.assert_calls(0);
    }

    #[tokio::test]
    async fn test_auth_failure_disables_bridge() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(401);
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());
        activate(&h.bridge);

        assert!(matches!(h.bridge.tick().await, TickOutcome::AuthRejected));
        assert!(!h.bridge.is_active());
        assert!(matches!(
            h.bridge.tick().await,
            TickOutcome::Skipped(SkipReason::Inactive)
        ));
        mock.assert_calls(1);
    }

    #[tokio::test]
    async fn test_not_found_keeps_bridge_active() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(404);
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());
        activate(&h.bridge);

        assert!(matches!(
            h.bridge.tick().await,
            TickOutcome::Failed(FetchError::NotFound(_))
        ));
        assert!(h.bridge.is_active());
    }

    #[tokio::test]
    async fn test_timeout_then_recovery() {
        let server = MockServer::start();
        let mut slow = server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200)
                .delay(Duration::from_secs(2))
                .json_body(batch());
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());
        activate(&h.bridge);

        assert!(matches!(
            h.bridge.tick().await,
            TickOutcome::Failed(FetchError::Timeout)
        ));
        assert!(h.bridge.is_active());

        slow.delete();
        server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200).json_body(batch());
        });
        assert!(matches!(
            h.bridge.tick().await,
            TickOutcome::Processed(BatchReport { delivered: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_bad_json_is_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200).body("not json");
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());
        activate(&h.bridge);

        assert!(matches!(
            h.bridge.tick().await,
            TickOutcome::Failed(FetchError::Decode(_))
        ));
        assert!(h.bridge.is_active());
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_abort_batch() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200).json_body(batch());
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::failing());
        activate(&h.bridge);

        match h.bridge.tick().await {
            TickOutcome::Processed(report) => {
                assert_eq!(report.failed_deliveries, 3);
                assert_eq!(report.delivered, 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Failed events are not retried.
        match h.bridge.tick().await {
            TickOutcome::Processed(report) => assert_eq!(report.duplicates, 4),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(h.sink.events().len(), 3);
    }

    #[tokio::test]
    async fn test_enable_preconditions() {
        let no_channel = harness(Some("http://127.0.0.1:9"), None, RecordingSink::default());
        assert_eq!(
            no_channel.bridge.enable().await,
            Err(BridgeError::ChannelNotConfigured)
        );
        assert!(!no_channel.bridge.is_active());
        assert!(!no_channel.bridge.task_running().await);

        let no_api = harness(None, Some(10), RecordingSink::default());
        assert_eq!(no_api.bridge.enable().await, Err(BridgeError::ApiNotConfigured));
        assert!(!no_api.bridge.is_active());

        no_channel.bridge.set_channel(ChannelId::new(55));
        assert_eq!(no_channel.bridge.check_ready(), Ok(ChannelId::new(55)));
    }

    #[tokio::test]
    async fn test_enable_and_disable_are_idempotent() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200).json_body(json!({"new_lines": []}));
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());

        assert_eq!(h.bridge.enable().await, Ok(EnableOutcome::Started));
        assert_eq!(h.bridge.enable().await, Ok(EnableOutcome::AlreadyActive));
        assert!(h.bridge.is_active());
        assert!(h.bridge.task_running().await);

        assert_eq!(h.bridge.disable().await, DisableOutcome::Stopped);
        assert_eq!(h.bridge.disable().await, DisableOutcome::AlreadyInactive);
        assert!(!h.bridge.is_active());

        let stopped = tokio::time::timeout(Duration::from_secs(5), async {
            while h.bridge.task_running().await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(stopped.is_ok(), "poll task did not stop");

        assert_eq!(h.bridge.enable().await, Ok(EnableOutcome::Started));
        h.bridge.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_reports_flags_independently() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(403);
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());
        assert_eq!(h.bridge.enable().await, Ok(EnableOutcome::Started));

        let deactivated = tokio::time::timeout(Duration::from_secs(5), async {
            while h.bridge.is_active() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(deactivated.is_ok(), "auth failure did not deactivate the bridge");

        let status = h.bridge.status().await;
        assert!(!status.active);
        assert!(status.task_running);
        assert!(status.api_configured);
        assert_eq!(status.channel, Some(ChannelId::new(10)));

        // Re-enabling reuses the live task.
        assert_eq!(h.bridge.enable().await, Ok(EnableOutcome::AlreadyActive));
        assert!(h.bridge.is_active());
        h.bridge.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_persists_seen_lines() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200).json_body(batch());
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());
        activate(&h.bridge);
        h.bridge.tick().await;
        h.bridge.shutdown().await.unwrap();

        let reloaded = SeenLog::load(h.temp.path().join("seen.json"), 7, 1000);
        assert_eq!(reloaded.len(), 4);
        assert!(reloaded.has("[12:00:01] [Server thread/INFO]: <Steve> hello there"));

        let diag = h.bridge.diagnostics().await;
        assert_eq!(diag.seen_entries, 4);
        assert!(diag.endpoint.unwrap().ends_with("/get_new_logs"));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_bridge_running() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200).json_body(batch());
        });
        let h = harness_with_state(Some(&server.base_url()), Some(10), RecordingSink::default(), |dir| {
            std::fs::write(dir.join("not-a-dir"), "plain file").unwrap();
            dir.join("not-a-dir").join("seen.json")
        });
        activate(&h.bridge);

        assert!(matches!(
            h.bridge.tick().await,
            TickOutcome::Processed(BatchReport { delivered: 3, .. })
        ));
        assert!(h.bridge.is_active());

        match h.bridge.tick().await {
            TickOutcome::Processed(report) => {
                assert_eq!(report.duplicates, 4);
                assert_eq!(report.delivered, 0);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(h.bridge.is_active());
        assert_eq!(h.sink.events().len(), 3);
        assert!(h.bridge.pipeline.writer.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_interleaved_enable_disable_leave_consistent_state() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/get_new_logs");
            then.status(200).json_body(json!({"new_lines": []}));
        });
        let h = harness(Some(&server.base_url()), Some(10), RecordingSink::default());

        for _ in 0..20 {
            let (enabled, _) = tokio::join!(h.bridge.enable(), h.bridge.disable());
            assert!(enabled.is_ok());
            let live = h
                .bridge
                .task
                .lock()
                .await
                .as_ref()
                .is_some_and(PollTask::is_live);
            assert_eq!(h.bridge.is_active(), live);
        }
        h.bridge.shutdown().await.unwrap();
    }
}
