//! Metrics collection for role engine observability

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Engine counters
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Number of single-resource role checks (`get_all_roles` / `has_role`)
    pub role_checks: u64,

    /// Number of bulk aggregation requests
    pub bulk_requests: u64,

    /// Number of role change batches fully applied
    pub batches_applied: u64,

    /// Number of batches that stopped part-way
    pub partial_failures: u64,

    /// Principals and groups visited across all traversals
    pub nodes_visited: u64,

    /// Number of traversals recorded in `nodes_visited`
    pub traversals: u64,

    /// Average resolution latency
    pub avg_latency_ms: f64,

    /// Error count
    pub error_count: u64,
}

impl EngineMetrics {
    /// Average number of nodes visited per traversal
    pub fn avg_nodes_per_traversal(&self) -> f64 {
        if self.traversals == 0 {
            0.0
        } else {
            self.nodes_visited as f64 / self.traversals as f64
        }
    }

    /// Share of applied batches that failed part-way
    pub fn partial_failure_rate(&self) -> f64 {
        let total = self.batches_applied + self.partial_failures;
        if total == 0 {
            0.0
        } else {
            self.partial_failures as f64 / total as f64
        }
    }
}

/// Metrics collector shared by the engine and its resolver
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Latency samples for the running average (bounded)
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(1_024))),
            max_samples: 10_000,
        }
    }

    /// Record a single-resource role check
    pub async fn record_role_check(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.role_checks += 1;
    }

    /// Record a bulk aggregation request
    pub async fn record_bulk_request(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.bulk_requests += 1;
    }

    /// Record a fully applied role change batch
    pub async fn record_batch_applied(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.batches_applied += 1;
    }

    /// Record a batch that stopped part-way
    pub async fn record_partial_failure(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.partial_failures += 1;
    }

    /// Record one traversal and the number of nodes it visited
    pub async fn record_nodes_visited(&self, nodes: u64) {
        let mut metrics = self.metrics.write().await;
        metrics.traversals += 1;
        metrics.nodes_visited += nodes;
    }

    /// Record resolution latency
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        // Release the samples lock before taking the metrics lock
        let avg_latency_ms = {
            let mut samples = self.latency_samples.write().await;
            samples.push(latency_ms);
            if samples.len() > self.max_samples {
                samples.drain(0..1_000);
            }
            samples.iter().sum::<f64>() / samples.len() as f64
        };

        let mut metrics = self.metrics.write().await;
        metrics.avg_latency_ms = avg_latency_ms;
    }

    /// Record an error
    pub async fn record_error(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.error_count += 1;
    }

    /// Get current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        self.latency_samples.write().await.clear();

        let mut metrics = self.metrics.write().await;
        *metrics = EngineMetrics::default();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_creation() {
        let collector = MetricsCollector::new();
        let metrics = collector.get_metrics().await;

        assert_eq!(metrics.role_checks, 0);
        assert_eq!(metrics.nodes_visited, 0);
        assert_eq!(metrics.avg_nodes_per_traversal(), 0.0);
    }

    #[tokio::test]
    async fn test_record_traversals() {
        let collector = MetricsCollector::new();

        collector.record_nodes_visited(3).await;
        collector.record_nodes_visited(5).await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.traversals, 2);
        assert_eq!(metrics.nodes_visited, 8);
        assert!((metrics.avg_nodes_per_traversal() - 4.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_record_batches() {
        let collector = MetricsCollector::new();

        collector.record_batch_applied().await;
        collector.record_batch_applied().await;
        collector.record_batch_applied().await;
        collector.record_partial_failure().await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.batches_applied, 3);
        assert_eq!(metrics.partial_failures, 1);
        assert!((metrics.partial_failure_rate() - 0.25).abs() < 0.001);
    }

    #[tokio::test]
    async fn test_record_latency() {
        let collector = MetricsCollector::new();

        collector.record_latency(Duration::from_millis(5)).await;
        collector.record_latency(Duration::from_millis(10)).await;
        collector.record_latency(Duration::from_millis(15)).await;

        let metrics = collector.get_metrics().await;
        assert!((metrics.avg_latency_ms - 10.0).abs() < 1.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_latency_and_reset_make_progress() {
        let collector = Arc::new(MetricsCollector::new());
        let mut handles = Vec::new();

        for worker in 0..8 {
            let collector = collector.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..2_000 {
                    if worker % 2 == 0 {
                        collector.record_latency(Duration::from_millis(3)).await;
                    } else {
                        collector.reset().await;
                    }
                }
            }));
        }

        let all = futures::future::join_all(handles);
        let results = tokio::time::timeout(Duration::from_secs(20), all)
            .await
            .expect("record_latency and reset must not deadlock");
        assert!(results.into_iter().all(|joined| joined.is_ok()));

        collector.record_latency(Duration::from_millis(4)).await;
        let metrics = collector.get_metrics().await;
        assert!(metrics.avg_latency_ms > 0.0);
    }

    #[tokio::test]
    async fn test_reset() {
        let collector = MetricsCollector::new();

        collector.record_role_check().await;
        collector.record_bulk_request().await;
        collector.record_error().await;

        collector.reset().await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.role_checks, 0);
        assert_eq!(metrics.bulk_requests, 0);
        assert_eq!(metrics.error_count, 0);
    }
}
