//! Audit Sink
//!
//! Append-only recorder of every defense decision. Writes are serialized
//! through a mutex so interleaved entries from concurrent stages never
//! corrupt each other. A persistence failure is mirrored to stderr so the
//! fact that a decision was made is never silently lost, and the decision
//! itself always takes effect regardless.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::error;

use crate::patterns::secrets;
use crate::store::Database;
use crate::types::{AuditEntry, RiskLevel};

pub struct AuditSink {
    db: Arc<Mutex<Database>>,
}

impl AuditSink {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }

    /// Record one decision. The reason passes through secret redaction,
    /// so an entry can never carry a raw credential even when the
    /// triggering content contained one.
    pub fn record(&self, stage: &str, decision: &str, risk_level: RiskLevel, reason: &str, actor_id: &str) {
        let entry = AuditEntry {
            stage: stage.to_string(),
            decision: decision.to_string(),
            risk_level,
            reason_code: secrets::redact(reason),
            timestamp: Utc::now().to_rfc3339(),
            actor_id: secrets::redact(actor_id),
        };

        let result = {
            let db = self.db.lock().unwrap();
            db.insert_audit_entry(&entry)
        };

        if let Err(e) = result {
            error!("Audit write failed: {:#}", e);
            // Secondary channel: the trail must not go dark silently.
            eprintln!(
                "[warden-audit-fallback] {} stage={} decision={} risk={:?} reason={}",
                entry.timestamp, entry.stage, entry.decision, entry.risk_level, entry.reason_code
            );
        }
    }

    /// Shared handle to the underlying database, for components that read
    /// history (reports, defense status).
    pub fn database(&self) -> Arc<Mutex<Database>> {
        Arc::clone(&self.db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> AuditSink {
        AuditSink::new(Arc::new(Mutex::new(Database::open_in_memory().unwrap())))
    }

    #[test]
    fn test_record_persists_entry() {
        let sink = sink();
        sink.record("vetter", "block", RiskLevel::High, "destructive_rm", "agent");

        let db = sink.database();
        let entries = db.lock().unwrap().recent_audit_entries(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].decision, "block");
    }

    #[test]
    fn test_record_redacts_secret_in_reason() {
        let sink = sink();
        let key = "sk-ant-REDACTED";
        sink.record(
            "sanitizer",
            "block",
            RiskLevel::Critical,
            &format!("credential in content: {}", key),
            "agent",
        );

        let db = sink.database();
        let entries = db.lock().unwrap().recent_audit_entries(10).unwrap();
        assert!(entries[0].reason_code.contains(secrets::MASK_TOKEN));
        assert!(!entries[0].reason_code.contains(key));
    }
}
