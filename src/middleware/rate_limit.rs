//! Rate limiting middleware
//!
//! Byte-rate accounting and traffic shaping for data connections.
//!
//! A [`ThroughputMonitor`] counts bytes since its last reset and turns every
//! accounted read or write into a wait time. One monitor is shared by the whole
//! server, one more belongs to each session. [`TrafficShaper`] applies both to
//! a running transfer: writes and the global monitor sleep, session reads
//! suspend the read side through a [`ReadGate`] instead.

use log::{debug, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::NO_LIMIT;

/// Default period of the counter reset tick
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Waits shorter than this are not worth a timer
const MINIMAL_WAIT_MS: i128 = 10;

/// Delay needed so that `bytes` over `interval_ms` stays under `limit` bytes/s.
pub fn compute_wait(bytes: u64, limit: i64, interval_ms: u64) -> Duration {
    if limit <= 0 {
        return Duration::ZERO;
    }
    let expected_ms = (bytes as i128 * 1000) / limit as i128;
    let wait = expected_ms - interval_ms as i128;
    if wait > MINIMAL_WAIT_MS {
        Duration::from_millis(wait as u64)
    } else {
        Duration::ZERO
    }
}

#[derive(Debug)]
pub struct ThroughputMonitor {
    name: String,
    read_limit: AtomicI64,
    write_limit: AtomicI64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    total_read: AtomicU64,
    total_written: AtomicU64,
    last_read_rate: AtomicU64,
    last_write_rate: AtomicU64,
    origin: Instant,
    last_reset_ms: AtomicU64,
}

impl ThroughputMonitor {
    pub fn new(name: impl Into<String>, read_limit: i64, write_limit: i64) -> Self {
        Self {
            name: name.into(),
            read_limit: AtomicI64::new(read_limit),
            write_limit: AtomicI64::new(write_limit),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            total_read: AtomicU64::new(0),
            total_written: AtomicU64::new(0),
            last_read_rate: AtomicU64::new(0),
            last_write_rate: AtomicU64::new(0),
            origin: Instant::now(),
            last_reset_ms: AtomicU64::new(0),
        }
    }

    pub fn unlimited(name: impl Into<String>) -> Self {
        Self::new(name, NO_LIMIT, NO_LIMIT)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Change both ceilings; takes effect on the next accounted block.
    pub fn configure(&self, read_limit: i64, write_limit: i64) {
        self.read_limit.store(read_limit, Ordering::Relaxed);
        self.write_limit.store(write_limit, Ordering::Relaxed);
        debug!(
            "Throughput monitor {} limits: read {} B/s, write {} B/s",
            self.name, read_limit, write_limit
        );
    }

    pub fn read_limit(&self) -> i64 {
        self.read_limit.load(Ordering::Relaxed)
    }

    pub fn write_limit(&self) -> i64 {
        self.write_limit.load(Ordering::Relaxed)
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn interval_ms(&self) -> u64 {
        self.now_ms()
            .saturating_sub(self.last_reset_ms.load(Ordering::Acquire))
    }

    /// Swap the interval counters to zero and record the rates they represent.
    pub fn reset_counters(&self) {
        let now = self.now_ms();
        let previous = self.last_reset_ms.swap(now, Ordering::AcqRel);
        let interval = now.saturating_sub(previous).max(1);
        let read = self.bytes_read.swap(0, Ordering::AcqRel);
        let written = self.bytes_written.swap(0, Ordering::AcqRel);
        self.last_read_rate
            .store(read * 1000 / interval, Ordering::Relaxed);
        self.last_write_rate
            .store(written * 1000 / interval, Ordering::Relaxed);
        trace!(
            "Monitor {} tick: read {} B/s, write {} B/s",
            self.name,
            self.last_read_rate(),
            self.last_write_rate()
        );
    }

    /// Account `n` bytes read; returns how long the reader should hold off.
    pub fn account_read(&self, n: usize) -> Duration {
        let bytes = self.bytes_read.fetch_add(n as u64, Ordering::AcqRel) + n as u64;
        self.total_read.fetch_add(n as u64, Ordering::Relaxed);
        compute_wait(bytes, self.read_limit(), self.interval_ms())
    }

    /// Account `n` bytes written; returns how long the writer should sleep.
    pub fn account_write(&self, n: usize) -> Duration {
        let bytes = self.bytes_written.fetch_add(n as u64, Ordering::AcqRel) + n as u64;
        self.total_written.fetch_add(n as u64, Ordering::Relaxed);
        compute_wait(bytes, self.write_limit(), self.interval_ms())
    }

    fn live_rate(&self, bytes: u64) -> u64 {
        bytes * 1000 / self.interval_ms().max(1)
    }

    /// Live check against the time since the last reset, not the cached rate.
    pub fn is_read_in_excess(&self) -> bool {
        let limit = self.read_limit();
        limit > 0 && self.live_rate(self.bytes_read.load(Ordering::Acquire)) > limit as u64
    }

    pub fn is_write_in_excess(&self) -> bool {
        let limit = self.write_limit();
        limit > 0 && self.live_rate(self.bytes_written.load(Ordering::Acquire)) > limit as u64
    }

    /// Read rate observed over the last complete interval, bytes/s
    pub fn last_read_rate(&self) -> u64 {
        self.last_read_rate.load(Ordering::Relaxed)
    }

    pub fn last_write_rate(&self) -> u64 {
        self.last_write_rate.load(Ordering::Relaxed)
    }

    pub fn total_read(&self) -> u64 {
        self.total_read.load(Ordering::Relaxed)
    }

    pub fn total_written(&self) -> u64 {
        self.total_written.load(Ordering::Relaxed)
    }

    /// Run the reset tick until `cancel` fires.
    pub fn spawn_reset_task(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => monitor.reset_counters(),
                }
            }
            trace!("Monitor {} reset task stopped", monitor.name);
        })
    }
}

/// Read-interest switch for one connection.
///
/// At most one resume timer is outstanding; suspending again while one is
/// pending is a no-op.
#[derive(Debug)]
pub struct ReadGate {
    enabled: AtomicBool,
    pending_resume: AtomicUsize,
    notify: Notify,
}

impl Default for ReadGate {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            pending_resume: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }
}

impl ReadGate {
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn pending_resumes(&self) -> usize {
        self.pending_resume.load(Ordering::Acquire)
    }

    /// Disable reads for `delay`. Returns false when a resume was already scheduled.
    pub fn suspend_for(self: &Arc<Self>, delay: Duration) -> bool {
        if self
            .pending_resume
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.enabled.store(false, Ordering::Release);
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            gate.resume();
        });
        true
    }

    fn resume(&self) {
        self.enabled.store(true, Ordering::Release);
        self.pending_resume.store(0, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Resolves once reads are enabled.
    pub async fn wait_enabled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_enabled() {
                return;
            }
            notified.await;
        }
    }
}

/// Applies the session and global monitors to one transfer.
#[derive(Debug, Clone)]
pub struct TrafficShaper {
    session: Arc<ThroughputMonitor>,
    global: Arc<ThroughputMonitor>,
    read_gate: Arc<ReadGate>,
}

impl TrafficShaper {
    pub fn new(session: Arc<ThroughputMonitor>, global: Arc<ThroughputMonitor>) -> Self {
        Self {
            session,
            global,
            read_gate: Arc::new(ReadGate::default()),
        }
    }

    /// Call before every data-socket read.
    pub async fn read_allowed(&self) {
        self.read_gate.wait_enabled().await;
    }

    /// Account a completed data-socket read.
    pub async fn after_read(&self, n: usize) {
        let session_wait = self.session.account_read(n);
        let global_wait = self.global.account_read(n);
        if !session_wait.is_zero() {
            self.read_gate.suspend_for(session_wait);
        }
        if !global_wait.is_zero() {
            tokio::time::sleep(global_wait).await;
        }
    }

    /// Account a completed data-socket write, sleeping as needed.
    pub async fn after_write(&self, n: usize) {
        let wait = self
            .session
            .account_write(n)
            .max(self.global.account_write(n));
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    pub fn read_gate(&self) -> &Arc<ReadGate> {
        &self.read_gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_formula() {
        assert_eq!(compute_wait(1000, NO_LIMIT, 0), Duration::ZERO);
        assert_eq!(compute_wait(1000, 0, 0), Duration::ZERO);
        // 2000 bytes at 1000 B/s should take 2000 ms; 500 ms already passed
        assert_eq!(compute_wait(2000, 1000, 500), Duration::from_millis(1500));
        // Under the threshold
        assert_eq!(compute_wait(1005, 1000, 1000), Duration::ZERO);
        // Ahead of schedule
        assert_eq!(compute_wait(100, 1000, 900), Duration::ZERO);
    }

    #[test]
    fn reset_swaps_counters_and_records_rate() {
        let monitor = ThroughputMonitor::unlimited("test");
        monitor.account_read(4096);
        monitor.account_write(1024);
        std::thread::sleep(Duration::from_millis(20));
        monitor.reset_counters();
        assert!(monitor.last_read_rate() > 0);
        assert!(monitor.last_write_rate() > 0);
        assert_eq!(monitor.total_read(), 4096);
        monitor.reset_counters();
        assert_eq!(monitor.last_read_rate(), 0);
        assert_eq!(monitor.total_read(), 4096);
    }

    #[test]
    fn excess_is_computed_live() {
        let monitor = ThroughputMonitor::new("test", 1000, NO_LIMIT);
        assert!(!monitor.is_read_in_excess());
        monitor.account_read(1_000_000);
        assert!(monitor.is_read_in_excess());
        assert!(!monitor.is_write_in_excess());
        monitor.configure(NO_LIMIT, NO_LIMIT);
        assert!(!monitor.is_read_in_excess());
    }

    #[tokio::test]
    async fn single_outstanding_resume() {
        let gate = Arc::new(ReadGate::default());
        assert!(gate.suspend_for(Duration::from_millis(50)));
        assert!(!gate.suspend_for(Duration::from_millis(5)));
        assert!(!gate.is_enabled());
        assert_eq!(gate.pending_resumes(), 1);

        tokio::time::timeout(Duration::from_secs(2), gate.wait_enabled())
            .await
            .expect("gate never resumed");
        assert!(gate.is_enabled());
        assert_eq!(gate.pending_resumes(), 0);
    }

    #[tokio::test]
    async fn write_throttle_bounds_throughput() {
        let limit: i64 = 200_000;
        let shaper = TrafficShaper::new(
            Arc::new(ThroughputMonitor::new("session", NO_LIMIT, limit)),
            Arc::new(ThroughputMonitor::unlimited("global")),
        );
        let start = std::time::Instant::now();
        let block = 10_000;
        for _ in 0..10 {
            shaper.after_write(block).await;
        }
        // 100 KB at 200 KB/s needs about 500 ms; the last block ends the run
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test]
    async fn read_throttle_suspends_and_resumes() {
        let shaper = TrafficShaper::new(
            Arc::new(ThroughputMonitor::new("session", 100_000, NO_LIMIT)),
            Arc::new(ThroughputMonitor::unlimited("global")),
        );
        let start = std::time::Instant::now();
        for _ in 0..5 {
            shaper.read_allowed().await;
            shaper.after_read(10_000).await;
        }
        shaper.read_allowed().await;
        // 50 KB at 100 KB/s: the gate held reads back for roughly half a second
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(shaper.read_gate().is_enabled());
    }
}
