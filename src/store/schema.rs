//! Database schema for the warden store.

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// All table definitions. There are no UPDATE paths against these tables
/// anywhere in the crate; the audit trail is append-only by construction.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_entries (
    id TEXT PRIMARY KEY,
    stage TEXT NOT NULL,
    decision TEXT NOT NULL,
    risk_level TEXT NOT NULL,
    reason_code TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    actor_id TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_stage ON audit_entries(stage);

CREATE TABLE IF NOT EXISTS threat_records (
    id TEXT PRIMARY KEY,
    threat_type TEXT NOT NULL,
    detail TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    severity TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_threat_timestamp ON threat_records(timestamp);

CREATE TABLE IF NOT EXISTS screening_attempts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    platform TEXT NOT NULL,
    message TEXT NOT NULL,
    matched_patterns TEXT NOT NULL,
    risk_score INTEGER NOT NULL,
    action TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_screening_user ON screening_attempts(user_id);
CREATE INDEX IF NOT EXISTS idx_screening_timestamp ON screening_attempts(timestamp);
"#;
