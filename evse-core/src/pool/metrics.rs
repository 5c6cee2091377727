//! Pool-level metrics aggregation: latency histograms and throughput
//! counters across every simulated session, computed with a simple
//! nearest-rank percentile.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Accumulates counters and latency samples for one running pool. Cheap to
/// mutate from the controller's hot path; `summary()` does the one-shot
/// sort-and-percentile work.
#[derive(Debug, Clone)]
pub struct Metrics {
    target_count: u32,
    start_time: Instant,

    active_sessions: u64,
    successful_connections: u64,
    failed_connections: u64,
    frames_in: u64,
    frames_out: u64,
    errors: u64,

    connection_latencies_us: Vec<u64>,
    message_latencies_us: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatencyStats {
    pub avg_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub active_sessions: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub errors: u64,
    pub connection_latency: LatencyStats,
    pub message_latency: LatencyStats,
    pub frames_per_second: f64,
    pub connections_per_second: f64,
    pub progress_percent: f64,
}

impl Metrics {
    pub fn new(target_count: u32) -> Self {
        Self {
            target_count,
            start_time: Instant::now(),
            active_sessions: 0,
            successful_connections: 0,
            failed_connections: 0,
            frames_in: 0,
            frames_out: 0,
            errors: 0,
            connection_latencies_us: Vec::new(),
            message_latencies_us: Vec::new(),
        }
    }

    pub fn set_active_sessions(&mut self, count: u64) {
        self.active_sessions = count;
    }

    pub fn record_connection_success(&mut self, latency: Duration) {
        self.successful_connections += 1;
        self.connection_latencies_us.push(latency.as_micros() as u64);
    }

    pub fn record_connection_failure(&mut self) {
        self.failed_connections += 1;
    }

    pub fn record_message_latency(&mut self, latency: Duration) {
        self.message_latencies_us.push(latency.as_micros() as u64);
    }

    pub fn record_frame_in(&mut self) {
        self.frames_in += 1;
    }

    pub fn record_frame_out(&mut self) {
        self.frames_out += 1;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    fn percentile(sorted: &[u64], p: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let idx = ((sorted.len() as f64 - 1.0) * p / 100.0).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    fn latency_stats(samples: &[u64]) -> LatencyStats {
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let avg_us = if sorted.is_empty() { 0.0 } else { sorted.iter().sum::<u64>() as f64 / sorted.len() as f64 };
        LatencyStats {
            avg_us,
            p50_us: Self::percentile(&sorted, 50.0),
            p95_us: Self::percentile(&sorted, 95.0),
            p99_us: Self::percentile(&sorted, 99.0),
            max_us: sorted.last().copied().unwrap_or(0),
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let frames_per_second = if elapsed > 0.0 { (self.frames_in + self.frames_out) as f64 / elapsed } else { 0.0 };
        let connections_per_second = if elapsed > 0.0 { self.successful_connections as f64 / elapsed } else { 0.0 };
        let progress_percent = if self.target_count == 0 { 100.0 } else { (self.successful_connections as f64 / self.target_count as f64) * 100.0 };

        MetricsSummary {
            active_sessions: self.active_sessions,
            successful_connections: self.successful_connections,
            failed_connections: self.failed_connections,
            frames_in: self.frames_in,
            frames_out: self.frames_out,
            errors: self.errors,
            connection_latency: Self::latency_stats(&self.connection_latencies_us),
            message_latency: Self::latency_stats(&self.message_latencies_us),
            frames_per_second,
            connections_per_second,
            progress_percent: progress_percent.min(100.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_over_known_distribution() {
        let mut metrics = Metrics::new(1);
        for i in 1..=100u64 {
            metrics.record_connection_success(Duration::from_micros(i));
        }
        let summary = metrics.summary();
        assert_eq!(summary.connection_latency.p50_us, 50);
        assert_eq!(summary.connection_latency.p95_us, 95);
        assert_eq!(summary.connection_latency.p99_us, 99);
        assert_eq!(summary.connection_latency.max_us, 100);
    }

    #[test]
    fn progress_percent_tracks_target() {
        let mut metrics = Metrics::new(4);
        metrics.record_connection_success(Duration::from_millis(1));
        metrics.record_connection_success(Duration::from_millis(1));
        assert_eq!(metrics.summary().progress_percent, 50.0);
    }

    #[test]
    fn progress_percent_clamped_at_100() {
        let mut metrics = Metrics::new(1);
        metrics.record_connection_success(Duration::from_millis(1));
        metrics.record_connection_success(Duration::from_millis(1));
        assert_eq!(metrics.summary().progress_percent, 100.0);
    }
}
