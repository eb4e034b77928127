// src/sandbox/metrics.rs

//! Resource measurement for one sandbox run.
//!
//! - wall-clock duration of the interpreter process
//! - peak resident memory (RSS), sampled with `sysinfo`
//!
//! Memory sampling is best-effort polling: short spikes can be missed, and
//! if the process cannot be inspected the peak is simply unknown.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::task::JoinHandle;

/// Measurements for a single run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetrics {
    pub duration_ms: u64,

    /// Peak RSS in KB, when it could be sampled.
    pub peak_rss_kb: Option<u64>,
}

impl RunMetrics {
    /// Peak RSS in whole MB, rounded up.
    pub fn peak_rss_mb(&self) -> Option<u64> {
        self.peak_rss_kb.map(|kb| kb.div_ceil(1024))
    }
}

/// Samples a child's RSS on a tokio task until stopped or the process
/// disappears. With a budget, the process is killed on the first sample
/// above it.
pub struct MemoryTracker {
    peak_kb: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl MemoryTracker {
    pub fn start(pid: u32, sample_every: Duration, limit_mb: Option<u64>) -> Self {
        let peak_kb = Arc::new(AtomicU64::new(0));
        let peak = Arc::clone(&peak_kb);
        let limit_kb = limit_mb.map(|mb| mb.saturating_mul(1024));

        let handle = tokio::spawn(async move {
            let pid = Pid::from_u32(pid);
            let mut system = System::new();

            loop {
                system.refresh_process(pid);

                let Some(process) = system.process(pid) else {
                    break;
                };

                // sysinfo 0.30 reports bytes
                let kb = process.memory() / 1024;
                peak.fetch_max(kb, Ordering::Relaxed);

                if limit_kb.is_some_and(|limit| kb > limit) {
                    tracing::info!(pid = %pid, peak_kb = kb, "memory budget exceeded; killing student code");
                    if !process.kill() {
                        tracing::warn!(pid = %pid, "could not kill process over its memory budget");
                    }
                    break;
                }

                tokio::time::sleep(sample_every).await;
            }
        });

        Self { peak_kb, handle }
    }

    /// Stop sampling and return the peak RSS in KB, if any sample was taken.
    pub async fn stop_and_take(mut self) -> Option<u64> {
        self.handle.abort();
        let _ = (&mut self.handle).await;

        match self.peak_kb.load(Ordering::Relaxed) {
            0 => None,
            kb => Some(kb),
        }
    }
}

impl Drop for MemoryTracker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn test_tracks_current_process() {
        let tracker = MemoryTracker::start(std::process::id(), Duration::from_millis(5), None);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let peak = tracker.stop_and_take().await;
        assert!(peak.is_some_and(|kb| kb > 0));
    }

    #[tokio::test]
    async fn test_unknown_pid_yields_nothing() {
        let tracker = MemoryTracker::start(u32::MAX - 7, Duration::from_millis(5), None);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(tracker.stop_and_take().await, None);
    }

    #[tokio::test]
    async fn test_budget_kills_process_while_running() {
        let Ok(mut child) = tokio::process::Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        else {
            eprintln!("sleep not available; skipping");
            return;
        };
        let Some(pid) = child.id() else {
            return;
        };

        let tracker = MemoryTracker::start(pid, Duration::from_millis(5), Some(0));
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child should be killed long before sleeping 30s")
            .unwrap();

        assert!(!status.success());
        assert!(tracker.stop_and_take().await.is_some_and(|kb| kb > 0));
    }

    #[test]
    fn test_peak_in_megabytes_rounds_up() {
        let metrics = RunMetrics {
            duration_ms: 3,
            peak_rss_kb: Some(3 * 1024 + 10),
        };
        assert_eq!(metrics.peak_rss_mb(), Some(4));

        let exact = RunMetrics {
            peak_rss_kb: Some(2048),
            ..RunMetrics::default()
        };
        assert_eq!(exact.peak_rss_mb(), Some(2));
    }
}
