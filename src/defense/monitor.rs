//! The self-defense daemon.
//!
//! One background tokio task per process. Each tick samples resources,
//! scans for dangerous siblings, and runs the scheduled deep sweep.
//! Request-path code feeds it inbound payloads and operation latencies
//! for replay and timing analysis. Every failure inside the loop is
//! caught and logged; the guarded system's availability always outranks
//! the monitor's.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audit::AuditSink;
use crate::types::{
    Alert, DefenseStatus, MonitorPolicy, MonitorState, NotificationSink, RiskLevel, ThreatRecord,
    ThreatType,
};

use super::replay::ReplayDetector;
use super::sampler::{scan_sibling_processes, CpuTracker};
use super::signals::install_termination_guards;
use super::sweep;
use super::timing::TimingBaselines;

struct MonitorInner {
    policy: MonitorPolicy,
    state: Mutex<MonitorState>,
    started_at: Instant,
    consecutive_failures: AtomicU32,
    threat_count: AtomicU64,
    replay: ReplayDetector,
    timing: TimingBaselines,
    audit: Arc<AuditSink>,
    notifier: Option<Arc<dyn NotificationSink>>,
    sweep_last_run: Mutex<Option<chrono::DateTime<Utc>>>,
}

impl MonitorInner {
    fn record_sample_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        if *state != MonitorState::Monitoring {
            info!("Self-defense monitor entering Monitoring state");
            *state = MonitorState::Monitoring;
        }
    }

    fn record_sample_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.policy.degraded_after_failures {
            let mut state = self.state.lock().unwrap();
            if *state != MonitorState::Degraded {
                warn!(
                    "Self-defense monitor degraded after {} consecutive sampling failures",
                    failures
                );
                *state = MonitorState::Degraded;
            }
        }
    }

    async fn emit_threat(&self, threat: ThreatRecord) {
        self.threat_count.fetch_add(1, Ordering::SeqCst);

        let result = {
            let db = self.audit.database();
            let db = db.lock().unwrap();
            db.insert_threat(&threat)
        };
        if let Err(e) = result {
            error!("Failed to persist threat record: {:#}", e);
        }

        self.audit.record(
            "monitor",
            "threat",
            threat.severity,
            &format!("{:?}: {}", threat.threat_type, threat.detail),
            "monitor",
        );

        if threat.severity >= RiskLevel::High {
            if let Some(ref notifier) = self.notifier {
                let alert = Alert {
                    level: threat.severity,
                    title: format!("Self-defense threat: {:?}", threat.threat_type),
                    detail: threat.detail.clone(),
                    timestamp: threat.timestamp.clone(),
                };
                if let Err(e) = notifier.post_alert(&alert).await {
                    warn!("Failed to post threat alert: {:#}", e);
                }
            }
        }
    }
}

pub struct SelfDefenseMonitor {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    inner: Arc<MonitorInner>,
}

impl SelfDefenseMonitor {
    pub fn new(
        policy: MonitorPolicy,
        audit: Arc<AuditSink>,
        notifier: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        let replay_window = Duration::from_secs(policy.replay_window_secs);
        let timing_sigma = policy.timing_sigma;
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            inner: Arc::new(MonitorInner {
                policy,
                state: Mutex::new(MonitorState::Starting),
                started_at: Instant::now(),
                consecutive_failures: AtomicU32::new(0),
                threat_count: AtomicU64::new(0),
                replay: ReplayDetector::new(replay_window),
                timing: TimingBaselines::new(timing_sigma),
                audit,
                notifier,
                sweep_last_run: Mutex::new(None),
            }),
        }
    }

    /// Start the monitor loop and install the termination-signal guards.
    pub fn start(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("Self-defense monitor is already running");
            return;
        }
        self.running.store(true, Ordering::SeqCst);

        if let Err(e) = install_termination_guards() {
            // Deterrence is best-effort; the monitor still runs without it.
            warn!("Could not install signal guards: {:#}", e);
        }

        let interval_secs = self.inner.policy.sample_interval_secs;
        info!(
            "Starting self-defense monitor with {}s sampling interval",
            interval_secs
        );

        let running = Arc::clone(&self.running);
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            let mut cpu_tracker = CpuTracker::new();

            loop {
                interval.tick().await;

                if !running.load(Ordering::SeqCst) {
                    info!("Self-defense monitor stopping");
                    break;
                }

                tick(&inner, &mut cpu_tracker).await;
            }
        });

        self.handle = Some(handle);
    }

    /// Stop the monitor at process shutdown. The loop is never cancelled
    /// mid-request; only this call ends it.
    pub fn stop(&mut self) {
        if !self.running.load(Ordering::SeqCst) {
            debug!("Self-defense monitor is not running");
            return;
        }

        info!("Stopping self-defense monitor");
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Feed one inbound request for replay analysis.
    pub async fn record_request(&self, payload: &str) {
        if self.inner.replay.record(payload) {
            self.inner
                .emit_threat(ThreatRecord {
                    threat_type: ThreatType::Replay,
                    detail: format!(
                        "request repeated within {}s window",
                        self.inner.policy.replay_window_secs
                    ),
                    timestamp: Utc::now().to_rfc3339(),
                    severity: RiskLevel::Medium,
                })
                .await;
        }
    }

    /// Feed one operation latency for timing-anomaly analysis.
    pub async fn record_latency(&self, operation: &str, latency: Duration) {
        if let Some(deviation) = self.inner.timing.record(operation, latency) {
            self.inner
                .emit_threat(ThreatRecord {
                    threat_type: ThreatType::TimingAnomaly,
                    detail: format!(
                        "{} took {:.1}ms against a {:.1}ms baseline ({:.1} sigma)",
                        deviation.operation,
                        deviation.latency_ms,
                        deviation.mean_ms,
                        deviation.sigma
                    ),
                    timestamp: Utc::now().to_rfc3339(),
                    severity: RiskLevel::Medium,
                })
                .await;
        }
    }

    pub fn status(&self) -> DefenseStatus {
        DefenseStatus {
            uptime_seconds: self.inner.started_at.elapsed().as_secs(),
            threat_count: self.inner.threat_count.load(Ordering::SeqCst),
            state: *self.inner.state.lock().unwrap(),
        }
    }
}

/// One monitor tick. Errors are absorbed here: a bad tick degrades the
/// monitor, never the host.
async fn tick(inner: &Arc<MonitorInner>, cpu_tracker: &mut CpuTracker) {
    match cpu_tracker.sample() {
        Ok(sample) => {
            inner.record_sample_success();

            if sample.cpu_percent > inner.policy.cpu_threshold_percent {
                inner
                    .emit_threat(ThreatRecord {
                        threat_type: ThreatType::HighCpu,
                        detail: format!(
                            "cpu at {:.1}% (threshold {:.1}%)",
                            sample.cpu_percent, inner.policy.cpu_threshold_percent
                        ),
                        timestamp: Utc::now().to_rfc3339(),
                        severity: RiskLevel::Medium,
                    })
                    .await;
            }

            if sample.memory_mb > inner.policy.memory_threshold_mb {
                inner
                    .emit_threat(ThreatRecord {
                        threat_type: ThreatType::HighMemory,
                        detail: format!(
                            "rss at {}MB (threshold {}MB)",
                            sample.memory_mb, inner.policy.memory_threshold_mb
                        ),
                        timestamp: Utc::now().to_rfc3339(),
                        severity: RiskLevel::Medium,
                    })
                    .await;
            }
        }
        Err(e) => {
            warn!("Resource sampling failed: {:#}", e);
            inner.record_sample_failure();
        }
    }

    match scan_sibling_processes() {
        Ok(found) => {
            for name in found {
                inner
                    .emit_threat(ThreatRecord {
                        threat_type: ThreatType::SuspiciousProcess,
                        detail: format!("dangerous sibling process: {}", name),
                        timestamp: Utc::now().to_rfc3339(),
                        severity: RiskLevel::High,
                    })
                    .await;
            }
        }
        Err(e) => warn!("Sibling process scan failed: {:#}", e),
    }

    let sweep_due = {
        let last_run = inner.sweep_last_run.lock().unwrap();
        sweep::is_due(&inner.policy.sweep_schedule, *last_run)
    };
    if sweep_due {
        debug!("Running scheduled deep sweep");
        for threat in sweep::run_sweep() {
            inner.emit_threat(threat).await;
        }
        *inner.sweep_last_run.lock().unwrap() = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::types::default_config;

    fn monitor() -> SelfDefenseMonitor {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        SelfDefenseMonitor::new(
            default_config().monitor,
            Arc::new(AuditSink::new(db)),
            None,
        )
    }

    #[test]
    fn test_starts_in_starting_state() {
        let m = monitor();
        assert_eq!(m.status().state, MonitorState::Starting);
        assert_eq!(m.status().threat_count, 0);
    }

    #[test]
    fn test_failures_then_success_drive_state_machine() {
        let m = monitor();
        for _ in 0..3 {
            m.inner.record_sample_failure();
        }
        assert_eq!(m.status().state, MonitorState::Degraded);

        m.inner.record_sample_success();
        assert_eq!(m.status().state, MonitorState::Monitoring);
    }

    #[test]
    fn test_fewer_failures_than_threshold_stay_starting() {
        let m = monitor();
        m.inner.record_sample_failure();
        assert_eq!(m.status().state, MonitorState::Starting);
    }

    #[tokio::test]
    async fn test_replayed_request_emits_threat() {
        let m = monitor();
        m.record_request("GET /balance").await;
        assert_eq!(m.status().threat_count, 0);

        m.record_request("GET /balance").await;
        assert_eq!(m.status().threat_count, 1);

        let db = m.inner.audit.database();
        let threats = db.lock().unwrap().recent_threats(5).unwrap();
        assert_eq!(threats[0].threat_type, ThreatType::Replay);
    }

    #[tokio::test]
    async fn test_timing_outlier_emits_threat() {
        let m = monitor();
        for i in 0..20 {
            let jitter = (i % 3) as u64;
            m.record_latency("classify", Duration::from_millis(50 + jitter))
                .await;
        }
        m.record_latency("classify", Duration::from_millis(800)).await;
        assert_eq!(m.status().threat_count, 1);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut m = monitor();
        assert!(!m.is_running());
        m.start();
        assert!(m.is_running());
        m.stop();
        assert!(!m.is_running());
    }
}
