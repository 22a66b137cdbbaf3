// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::TransportError;
use crate::host::HostId;
use crate::proc::HostMetrics;
use crate::snapshot::{assemble, RuntimeMetric, Snapshot, SnapshotContext};
use crate::state::AggregationState;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, Instrument};

/// Hands an encoded metrics message to the collector.
#[async_trait]
pub trait MetricsTransport: Send + Sync {
    async fn send_metrics(&self, message: Vec<u8>) -> Result<(), TransportError>;
}

/// Source of the runtime counters appended to every message.
pub trait RuntimeMetricsProvider: Send + Sync {
    fn runtime_metrics(&self) -> Vec<RuntimeMetric>;
}

pub struct FlusherConfig {
    pub state: Arc<AggregationState>,
    pub host: HostId,
    pub interval: Duration,
    pub transport: Arc<dyn MetricsTransport>,
    pub runtime_metrics: Option<Arc<dyn RuntimeMetricsProvider>>,
    /// Read host metrics from `/proc` on every flush
    pub collect_host_metrics: bool,
}

pub struct Flusher {
    state: Arc<AggregationState>,
    host: HostId,
    interval: Duration,
    transport: Arc<dyn MetricsTransport>,
    runtime_metrics: Option<Arc<dyn RuntimeMetricsProvider>>,
    collect_host_metrics: bool,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Self {
        Flusher {
            state: config.state,
            host: config.host,
            interval: config.interval,
            transport: config.transport,
            runtime_metrics: config.runtime_metrics,
            collect_host_metrics: config.collect_host_metrics,
        }
    }

    fn interval_secs(&self) -> i32 {
        i32::try_from(self.interval.as_secs()).unwrap_or(i32::MAX)
    }

    /// Drains one cycle and sends it.
    ///
    /// Returns the snapshot that was handed to the transport, or `None` if no
    /// message could be built. Transport failures are logged; the cycle is
    /// not retried.
    pub async fn flush(&self) -> Option<Snapshot> {
        let mut context = SnapshotContext::new(&self.host, self.interval_secs());
        if self.collect_host_metrics {
            context.host_metrics = HostMetrics::collect();
        }
        if let Some(provider) = &self.runtime_metrics {
            context.runtime_metrics = provider.runtime_metrics();
        }

        let snapshot = match assemble(&self.state, &context) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to build metrics message: {e}");
                return None;
            }
        };

        debug!(
            "Flushing metrics message of {} bytes ({} histograms omitted)",
            snapshot.message.len(),
            snapshot.omitted()
        );
        if let Err(e) = self.transport.send_metrics(snapshot.message.clone()).await {
            error!("{e}");
        }
        Some(snapshot)
    }

    /// Flushes on every tick of the configured interval until `cancel_token`
    /// fires, then flushes one last time.
    pub async fn run(&self, cancel_token: CancellationToken) {
        let mut flush_interval = interval(self.interval);
        flush_interval.tick().await; // discard first tick
        let mut cycle: u64 = 0;

        loop {
            cycle += 1;
            tokio::select! {
                _ = flush_interval.tick() => {
                    self.flush().instrument(debug_span!("flush", cycle)).await;
                }
                () = cancel_token.cancelled() => {
                    debug!("Final flush of metrics");
                    self.flush().instrument(debug_span!("flush", cycle)).await;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::HttpSpanMessage;
    use bson::Document;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl MetricsTransport for RecordingTransport {
        async fn send_metrics(&self, message: Vec<u8>) -> Result<(), TransportError> {
            if self.fail {
                return Err(TransportError::Send("collector unreachable".to_string()));
            }
            self.sent.lock().expect("lock poisoned").push(message);
            Ok(())
        }
    }

    struct FixedRuntimeMetrics;

    impl RuntimeMetricsProvider for FixedRuntimeMetrics {
        fn runtime_metrics(&self) -> Vec<RuntimeMetric> {
            vec![RuntimeMetric::new(
                "Threads",
                crate::snapshot::MetricValue::Int32(4),
            )]
        }
    }

    fn flusher(
        transport: Arc<RecordingTransport>,
        interval: Duration,
    ) -> (Flusher, Arc<AggregationState>) {
        let state = Arc::new(AggregationState::default());
        let flusher = Flusher::new(FlusherConfig {
            state: Arc::clone(&state),
            host: HostId {
                hostname: "test".to_string(),
                ..Default::default()
            },
            interval,
            transport,
            runtime_metrics: Some(Arc::new(FixedRuntimeMetrics)),
            collect_host_metrics: false,
        });
        (flusher, state)
    }

    fn checkout_span() -> HttpSpanMessage {
        HttpSpanMessage {
            transaction: "checkout".to_string(),
            duration: Duration::from_millis(20),
            status: 200,
            method: "GET".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_flush_sends_message_and_resets_state() {
        let transport = Arc::new(RecordingTransport::default());
        let (flusher, state) = flusher(Arc::clone(&transport), Duration::from_secs(30));
        state.record_span(&checkout_span());

        let snapshot = flusher.flush().await.expect("snapshot");
        assert_eq!(snapshot.outcomes.len(), 2);
        assert!(state.histograms().is_empty());
        assert!(state.measurements().is_empty());

        let sent = transport.sent.lock().expect("lock poisoned").clone();
        assert_eq!(sent.len(), 1);
        let doc = Document::from_reader(sent[0].as_slice()).expect("valid BSON");
        assert_eq!(doc.get_str("Hostname").ok(), Some("test"));
        assert_eq!(doc.get_i32("MetricsFlushInterval").ok(), Some(30));
        assert_eq!(doc.get_array("histograms").expect("histograms").len(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transport_error_is_logged() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let (flusher, state) = flusher(transport, Duration::from_secs(30));
        state.record_span(&checkout_span());

        assert!(flusher.flush().await.is_some());
        assert!(logs_contain("collector unreachable"));
        assert!(state.histograms().is_empty(), "the cycle is not retried");
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_flushes_on_tick_and_on_cancel() {
        let transport = Arc::new(RecordingTransport::default());
        let (flusher, state) = flusher(Arc::clone(&transport), Duration::from_secs(10));
        let flusher = Arc::new(flusher);
        let cancel_token = CancellationToken::new();

        let handle = {
            let flusher = Arc::clone(&flusher);
            let cancel_token = cancel_token.clone();
            tokio::spawn(async move { flusher.run(cancel_token).await })
        };

        state.record_span(&checkout_span());
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(transport.sent.lock().expect("lock poisoned").len(), 1);

        cancel_token.cancel();
        handle.await.expect("flusher task");
        assert_eq!(transport.sent.lock().expect("lock poisoned").len(), 2);
    }
}
