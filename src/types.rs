//! Warden - Type Definitions
//!
//! All shared types for the agent trust-boundary runtime: the risk
//! vocabulary, the records produced by each defense stage, and the
//! collaborator ports (classifier, secret store, notification sink).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ─── Risk Vocabulary ─────────────────────────────────────────────

/// Ordered risk classification shared by every defense stage.
///
/// The ordering matters: policy comparisons (`level >= RiskLevel::High`)
/// rely on `Low < Medium < High < Critical`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map an accumulated pattern weight to a risk level.
    ///
    /// Every stage uses this same mapping so that identical evidence can
    /// never produce divergent judgments. More weight never lowers the
    /// level.
    pub fn from_weight(weight: u32) -> Self {
        match weight {
            w if w >= 15 => RiskLevel::Critical,
            w if w >= 10 => RiskLevel::High,
            w if w >= 5 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

/// Which defense stage a pattern rule applies to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Sanitizer,
    Vetter,
    Social,
}

/// Category labels for pattern rules.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatternCategory {
    InstructionOverride,
    AuthorityClaim,
    BoundaryManipulation,
    Obfuscation,
    CredentialRequest,
    NeedClaim,
    ProbingCommand,
    TemporaryException,
    ShellInjection,
    PathTraversal,
    EmbeddedCredential,
    SelfHarm,
}

// ─── Sanitizer ───────────────────────────────────────────────────

/// The structured, safe summary produced by the content sanitizer.
///
/// This is the only representation of untrusted content that ever reaches
/// agent reasoning; the raw text stays behind the boundary.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContentSummary {
    pub tldr: Vec<String>,
    pub key_facts: Vec<String>,
    pub links: Vec<String>,
    pub suspicious: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationResult {
    pub summary: ContentSummary,
    pub is_safe: bool,
    pub source_ref: String,
}

// ─── Vetter ──────────────────────────────────────────────────────

/// A tool invocation proposed by the agent, awaiting vetting.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub originating_user_request: String,
    pub requested_at: String,
}

/// The vetter's verdict on a proposed tool call. Immutable once produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VettingDecision {
    pub allowed: bool,
    pub risk_level: RiskLevel,
    pub reason: String,
    pub requires_confirmation: bool,
}

// ─── Social-Engineering Detector ─────────────────────────────────

/// What the detector decided to do with a screened message.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScreeningAction {
    Allow,
    Warn,
    Block,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialEngineeringAttempt {
    pub user_id: String,
    pub platform: String,
    pub message: String,
    pub matched_patterns: Vec<String>,
    pub risk_score: u32,
    pub action: ScreeningAction,
    pub timestamp: String,
}

// ─── Self-Defense Monitor ────────────────────────────────────────

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    HighCpu,
    HighMemory,
    Replay,
    TimingAnomaly,
    SuspiciousProcess,
}

/// A threat observed by the self-defense monitor. Never modified after
/// creation; pruned on a retention window, never edited.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatRecord {
    pub threat_type: ThreatType,
    pub detail: String,
    pub timestamp: String,
    pub severity: RiskLevel,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Starting,
    Monitoring,
    Degraded,
}

/// Snapshot returned by `DefenseRuntime::defense_status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefenseStatus {
    pub uptime_seconds: u64,
    pub threat_count: u64,
    pub state: MonitorState,
}

// ─── Audit ───────────────────────────────────────────────────────

/// One append-only audit record. Reason codes are redacted before write
/// so an entry can never carry a raw credential value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub stage: String,
    pub decision: String,
    pub risk_level: RiskLevel,
    pub reason_code: String,
    pub timestamp: String,
    pub actor_id: String,
}

// ─── Alerts ──────────────────────────────────────────────────────

/// A human-facing alert surfaced through the notification sink.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub level: RiskLevel,
    pub title: String,
    pub detail: String,
    pub timestamp: String,
}

// ─── Classifier Port ─────────────────────────────────────────────

/// Errors the classifier port can produce. Components translate these
/// into their fail policy (fail-safe or fail-closed); they are never
/// surfaced to the agent.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier call timed out")]
    Timeout,
    #[error("classifier provider error: {0}")]
    Provider(String),
    #[error("classifier returned malformed output: {0}")]
    MalformedOutput(String),
}

/// Narrow semantic-judgment capability backed by an external language
/// model. Swappable with a deterministic stub for tests.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, prompt: &str) -> Result<String, ClassifierError>;
}

// ─── Secret Store Port ───────────────────────────────────────────

/// Opaque handle to a stored secret. The raw value crosses the store
/// boundary exactly once and is never read back.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretHandle {
    pub id: String,
    pub name: String,
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn store(&self, name: &str, value: &str) -> anyhow::Result<SecretHandle>;
    async fn revoke(&self, handle: &SecretHandle) -> anyhow::Result<()>;
}

// ─── Notification Sink Port ──────────────────────────────────────

/// Surface for critical alerts. Failures to notify are logged but never
/// block the underlying decision.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post_alert(&self, alert: &Alert) -> anyhow::Result<()>;
}

// ─── Configuration ───────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Thresholds for the social-engineering detector. Spec defaults, but
/// deployment policy, not invariants.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialPolicy {
    /// Per-message score at which the action becomes Block.
    pub block_threshold: u32,
    /// Per-message score at which a Warn also raises an alert.
    pub warn_alert_threshold: u32,
    /// Per-message score at which the action becomes Warn.
    pub warn_threshold: u32,
    /// Rolling per-user score that forces Block regardless of the
    /// single-message score.
    pub cumulative_threshold: u32,
    /// Rolling window for the cumulative score, in seconds.
    pub cumulative_window_secs: u64,
}

/// Thresholds and intervals for the self-defense monitor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorPolicy {
    pub sample_interval_secs: u64,
    pub cpu_threshold_percent: f64,
    pub memory_threshold_mb: u64,
    /// Window within which a repeated request hash counts as a replay.
    pub replay_window_secs: u64,
    /// Standard deviations beyond the rolling mean that flag a timing
    /// anomaly.
    pub timing_sigma: f64,
    /// Consecutive sampling failures before the monitor reports Degraded.
    pub degraded_after_failures: u32,
    /// Cron schedule for the deep sweep (environment + process command
    /// lines scanned for leaked secrets).
    pub sweep_schedule: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WardenConfig {
    pub db_path: String,
    pub log_level: LogLevel,
    pub classifier_api_url: String,
    pub classifier_api_key: String,
    pub classifier_model: String,
    pub classifier_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_webhook_url: Option<String>,
    /// Optional YAML file with site-local pattern rules layered over the
    /// builtin catalog.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern_overlay_path: Option<String>,
    /// Days of audit/threat history to retain before pruning.
    pub retention_days: u32,
    pub social: SocialPolicy,
    pub monitor: MonitorPolicy,
}

/// Returns the default `WardenConfig`. Callers override the classifier
/// credentials; everything else is a sensible starting policy.
pub fn default_config() -> WardenConfig {
    WardenConfig {
        db_path: "~/.warden/warden.db".to_string(),
        log_level: LogLevel::Info,
        classifier_api_url: "https://api.openai.com".to_string(),
        classifier_api_key: String::new(),
        classifier_model: "gpt-4o-mini".to_string(),
        classifier_timeout_secs: 20,
        alert_webhook_url: None,
        pattern_overlay_path: None,
        retention_days: 30,
        social: SocialPolicy {
            block_threshold: 15,
            warn_alert_threshold: 10,
            warn_threshold: 5,
            cumulative_threshold: 25,
            cumulative_window_secs: 1800,
        },
        monitor: MonitorPolicy {
            sample_interval_secs: 5,
            cpu_threshold_percent: 85.0,
            memory_threshold_mb: 1024,
            replay_window_secs: 60,
            timing_sigma: 3.0,
            degraded_after_failures: 3,
            sweep_schedule: "0 */30 * * * *".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn test_from_weight_is_monotonic() {
        let mut last = RiskLevel::Low;
        for w in 0..40 {
            let level = RiskLevel::from_weight(w);
            assert!(level >= last, "weight {} lowered the level", w);
            last = level;
        }
    }

    #[test]
    fn test_from_weight_thresholds() {
        assert_eq!(RiskLevel::from_weight(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_weight(5), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_weight(10), RiskLevel::High);
        assert_eq!(RiskLevel::from_weight(15), RiskLevel::Critical);
    }

    #[test]
    fn test_default_config_policy_values() {
        let config = default_config();
        assert_eq!(config.social.block_threshold, 15);
        assert_eq!(config.social.warn_alert_threshold, 10);
        assert_eq!(config.social.warn_threshold, 5);
        assert_eq!(config.monitor.sample_interval_secs, 5);
    }
}
