//! Rolling scan statistics
//!
//! Latency figures cover the most recent samples only; totals and throughput
//! cover the whole session.

use crate::domain::types::PerformanceSample;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::info;

pub const DEFAULT_WINDOW: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub total_scans: u64,
    pub successful_scans: u64,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub throughput_per_minute: f64,
    pub session_secs: u64,
    pub operator_id: Option<String>,
}

impl PerformanceReport {
    pub fn log(&self) {
        info!(
            total_scans = self.total_scans,
            success_rate = format!("{:.1}%", self.success_rate * 100.0),
            avg_latency_ms = format!("{:.1}", self.avg_latency_ms),
            min_latency_ms = self.min_latency_ms,
            max_latency_ms = self.max_latency_ms,
            throughput_per_min = format!("{:.2}", self.throughput_per_minute),
            operator_id = self.operator_id.as_deref().unwrap_or(""),
            "performance_report"
        );
    }
}

pub struct PerformanceMonitor {
    window: usize,
    samples: VecDeque<PerformanceSample>,
    total: u64,
    successful: u64,
    session_start: Instant,
    operator_id: Option<String>,
}

impl PerformanceMonitor {
    pub fn new(window: usize, operator_id: Option<String>) -> Self {
        Self::starting_at(window, operator_id, Instant::now())
    }

    pub fn starting_at(window: usize, operator_id: Option<String>, session_start: Instant) -> Self {
        let window = window.max(1);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
            total: 0,
            successful: 0,
            session_start,
            operator_id,
        }
    }

    pub fn record(&mut self, sample: PerformanceSample) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total += 1;
        if sample.success {
            self.successful += 1;
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &PerformanceSample> {
        self.samples.iter()
    }

    pub fn report(&self, now: Instant) -> PerformanceReport {
        let count = self.samples.len() as u64;
        let sum: u64 = self.samples.iter().map(|s| s.duration_ms).sum();
        let elapsed = now.saturating_duration_since(self.session_start);
        let minutes = elapsed.as_secs_f64() / 60.0;

        PerformanceReport {
            total_scans: self.total,
            successful_scans: self.successful,
            success_rate: if self.total > 0 { self.successful as f64 / self.total as f64 } else { 0.0 },
            avg_latency_ms: if count > 0 { sum as f64 / count as f64 } else { 0.0 },
            min_latency_ms: self.samples.iter().map(|s| s.duration_ms).min().unwrap_or(0),
            max_latency_ms: self.samples.iter().map(|s| s.duration_ms).max().unwrap_or(0),
            throughput_per_minute: if minutes > 0.0 { self.total as f64 / minutes } else { 0.0 },
            session_secs: elapsed.as_secs(),
            operator_id: self.operator_id.clone(),
        }
    }
}
