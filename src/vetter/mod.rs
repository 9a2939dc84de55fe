//! Tool Vetter
//!
//! Gates every tool invocation the agent proposes. Fail-closed: any
//! uncertainty (classifier unavailable, ambiguous output, unknown risk)
//! resolves to BLOCK. The pipeline short-circuits on the first conclusive
//! step, so allowlisted tools never pay for a classifier call.

pub mod policy;

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::audit::AuditSink;
use crate::patterns::{secrets, PatternCatalog};
use crate::types::{
    Alert, Classifier, NotificationSink, RiskLevel, Stage, VettingDecision,
};

pub struct ToolVetter {
    catalog: Arc<PatternCatalog>,
    classifier: Arc<dyn Classifier>,
    audit: Arc<AuditSink>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl ToolVetter {
    pub fn new(
        catalog: Arc<PatternCatalog>,
        classifier: Arc<dyn Classifier>,
        audit: Arc<AuditSink>,
        notifier: Option<Arc<dyn NotificationSink>>,
    ) -> Self {
        Self {
            catalog,
            classifier,
            audit,
            notifier,
        }
    }

    /// Vet one proposed tool call.
    ///
    /// `user_request` is the natural-language request that led the agent
    /// to propose this call; the classifier judges whether the call's
    /// risk is justified by that stated intent.
    pub async fn vet(
        &self,
        tool_name: &str,
        arguments: &Value,
        user_request: &str,
    ) -> VettingDecision {
        // 1. Denylist: immediate block.
        if policy::is_denylisted(tool_name) {
            return self
                .finish(
                    tool_name,
                    VettingDecision {
                        allowed: false,
                        risk_level: RiskLevel::Critical,
                        reason: "denylisted".to_string(),
                        requires_confirmation: false,
                    },
                )
                .await;
        }

        // 2. Allowlist: read-only tools skip everything else.
        if policy::is_allowlisted(tool_name) {
            return self
                .finish(
                    tool_name,
                    VettingDecision {
                        allowed: true,
                        risk_level: RiskLevel::Low,
                        reason: "allowlisted read-only tool".to_string(),
                        requires_confirmation: false,
                    },
                )
                .await;
        }

        // 3. Deterministic argument scan.
        let arg_text = flatten_json(arguments);
        let matches = self.catalog.scan(&arg_text, Stage::Vetter);
        if let Some(hit) = matches.iter().find(|m| m.severity() >= RiskLevel::High) {
            return self
                .finish(
                    tool_name,
                    VettingDecision {
                        allowed: false,
                        risk_level: hit.severity(),
                        reason: format!("arguments match dangerous pattern: {}", hit.rule_id),
                        requires_confirmation: false,
                    },
                )
                .await;
        }

        let risk = policy::risk_class(tool_name);

        // Critical-class tools are never permitted by this pipeline,
        // whatever the classifier might say.
        if risk == RiskLevel::Critical {
            return self
                .finish(
                    tool_name,
                    VettingDecision {
                        allowed: false,
                        risk_level: RiskLevel::Critical,
                        reason: "critical-class tool requires out-of-band multi-party approval"
                            .to_string(),
                        requires_confirmation: false,
                    },
                )
                .await;
        }

        // Low-risk tool, clean arguments: nothing left to judge.
        if risk == RiskLevel::Low && matches.is_empty() {
            return self
                .finish(
                    tool_name,
                    VettingDecision {
                        allowed: true,
                        risk_level: RiskLevel::Low,
                        reason: "low-risk tool, no argument findings".to_string(),
                        requires_confirmation: false,
                    },
                )
                .await;
        }

        // 4. Classifier judgment for the remaining Medium/High tools.
        let decision = match self.classify_call(tool_name, &arg_text, user_request, risk).await {
            Ok(decision) => decision,
            Err(reason) => {
                warn!("Vetting classifier unavailable for {}: {}", tool_name, reason);
                VettingDecision {
                    allowed: false,
                    risk_level: risk,
                    reason: format!("blocked (fail-closed): {}", reason),
                    requires_confirmation: false,
                }
            }
        };

        self.finish(tool_name, decision).await
    }

    /// Ask the classifier whether the call's risk is justified by the
    /// stated intent. The contract is strict: first line PERMIT or BLOCK,
    /// second line a one-line reason. Anything else is a block.
    async fn classify_call(
        &self,
        tool_name: &str,
        arg_text: &str,
        user_request: &str,
        risk: RiskLevel,
    ) -> Result<VettingDecision, String> {
        let prompt = format!(
            "You vet tool calls for an autonomous agent.\n\
             Judge whether this call's risk is justified by the user's stated\n\
             intent. Answer with exactly two lines: the first line is the single\n\
             word PERMIT or BLOCK, the second line a one-line reason.\n\n\
             Tool: {}\n\
             Arguments: {}\n\
             User request: {}",
            tool_name,
            secrets::redact(arg_text),
            secrets::redact(user_request),
        );

        let output = self
            .classifier
            .classify(&prompt)
            .await
            .map_err(|e| e.to_string())?;

        let mut lines = output.trim().lines();
        let verdict = lines.next().unwrap_or("").trim().to_uppercase();
        let reason = lines.next().unwrap_or("").trim().to_string();

        match verdict.as_str() {
            "PERMIT" => Ok(VettingDecision {
                allowed: true,
                risk_level: risk,
                reason: if reason.is_empty() {
                    "classifier permitted".to_string()
                } else {
                    reason
                },
                requires_confirmation: risk >= RiskLevel::High,
            }),
            "BLOCK" => Ok(VettingDecision {
                allowed: false,
                risk_level: risk,
                reason: if reason.is_empty() {
                    "classifier blocked".to_string()
                } else {
                    reason
                },
                requires_confirmation: false,
            }),
            _ => Ok(VettingDecision {
                allowed: false,
                risk_level: risk,
                reason: "classifier output did not match the PERMIT/BLOCK contract".to_string(),
                requires_confirmation: false,
            }),
        }
    }

    /// Audit the decision and surface high-risk blocks as alerts.
    async fn finish(&self, tool_name: &str, decision: VettingDecision) -> VettingDecision {
        debug!(
            "Vetted {}: allowed={} risk={:?}",
            tool_name, decision.allowed, decision.risk_level
        );

        self.audit.record(
            "vetter",
            if decision.allowed { "allow" } else { "block" },
            decision.risk_level,
            &decision.reason,
            tool_name,
        );

        if !decision.allowed && decision.risk_level >= RiskLevel::High {
            if let Some(ref notifier) = self.notifier {
                let alert = Alert {
                    level: decision.risk_level,
                    title: format!("Blocked high-risk tool call: {}", tool_name),
                    detail: secrets::redact(&decision.reason),
                    timestamp: Utc::now().to_rfc3339(),
                };
                if let Err(e) = notifier.post_alert(&alert).await {
                    warn!("Failed to post vetting alert: {:#}", e);
                }
            }
        }

        decision
    }
}

/// Flatten a JSON value into scannable text: keys and leaf values,
/// space-separated.
fn flatten_json(value: &Value) -> String {
    let mut out = String::new();
    collect_json(value, &mut out);
    out
}

fn collect_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                out.push_str(key);
                out.push(' ');
                collect_json(val, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_json(item, out);
            }
        }
        Value::String(s) => {
            out.push_str(s);
            out.push(' ');
        }
        Value::Number(n) => {
            out.push_str(&n.to_string());
            out.push(' ');
        }
        Value::Bool(b) => {
            out.push_str(if *b { "true" } else { "false" });
            out.push(' ');
        }
        Value::Null => {}
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::classifier::StubClassifier;
    use crate::store::Database;

    fn vetter_with(classifier: StubClassifier) -> ToolVetter {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        ToolVetter::new(
            Arc::new(PatternCatalog::builtin()),
            Arc::new(classifier),
            Arc::new(AuditSink::new(db)),
            None,
        )
    }

    #[tokio::test]
    async fn test_denylisted_tool_is_blocked() {
        let vetter = vetter_with(StubClassifier::new("PERMIT\nfine"));
        let decision = vetter.vet("raw_eval", &json!({}), "run some code").await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "denylisted");
    }

    #[tokio::test]
    async fn test_allowlisted_tool_skips_classifier() {
        let stub = StubClassifier::failing();
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let classifier = Arc::new(stub);
        let vetter = ToolVetter::new(
            Arc::new(PatternCatalog::builtin()),
            classifier.clone(),
            Arc::new(AuditSink::new(db)),
            None,
        );

        let decision = vetter
            .vet("search_web", &json!({"query": "rust async"}), "find docs")
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.risk_level, RiskLevel::Low);
        assert_eq!(classifier.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rm_rf_root_blocked_with_failing_classifier() {
        let vetter = vetter_with(StubClassifier::failing());
        let decision = vetter
            .vet(
                "execute_shell",
                &json!({"command": "rm -rf /"}),
                "clean up",
            )
            .await;
        assert!(!decision.allowed);
        assert!(!decision.reason.is_empty());
    }

    #[tokio::test]
    async fn test_shell_rm_logs_scenario() {
        let vetter = vetter_with(StubClassifier::new("PERMIT\nfine"));
        let decision = vetter
            .vet(
                "execute_shell",
                &json!({"command": "rm -rf *.log"}),
                "delete log files",
            )
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.risk_level, RiskLevel::High);
        assert!(decision.reason.contains("destructive_rm"));
    }

    #[tokio::test]
    async fn test_path_traversal_argument_blocked() {
        let vetter = vetter_with(StubClassifier::new("PERMIT\nfine"));
        let decision = vetter
            .vet(
                "read_file",
                &json!({"path": "../../etc/shadow"}),
                "read my notes",
            )
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("path_traversal"));
    }

    #[tokio::test]
    async fn test_classifier_failure_fails_closed() {
        let vetter = vetter_with(StubClassifier::failing());
        let decision = vetter
            .vet(
                "write_file",
                &json!({"path": "notes.txt", "content": "hello"}),
                "save my notes",
            )
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("fail-closed"));
    }

    #[tokio::test]
    async fn test_classifier_permit_allows_clean_medium_tool() {
        let vetter = vetter_with(StubClassifier::new("PERMIT\njustified by stated intent"));
        let decision = vetter
            .vet(
                "write_file",
                &json!({"path": "notes.txt", "content": "hello"}),
                "save my notes",
            )
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.risk_level, RiskLevel::Medium);
        assert!(!decision.requires_confirmation);
    }

    #[tokio::test]
    async fn test_permitted_high_risk_tool_requires_confirmation() {
        let vetter = vetter_with(StubClassifier::new("PERMIT\nintent matches"));
        let decision = vetter
            .vet(
                "execute_shell",
                &json!({"command": "ls -la /tmp"}),
                "list temp files",
            )
            .await;
        assert!(decision.allowed);
        assert!(decision.requires_confirmation);
    }

    #[tokio::test]
    async fn test_malformed_classifier_output_blocks() {
        let vetter = vetter_with(StubClassifier::new("MAYBE? it depends"));
        let decision = vetter
            .vet("write_file", &json!({"path": "a.txt"}), "write a file")
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("PERMIT/BLOCK"));
    }

    #[tokio::test]
    async fn test_critical_class_tool_never_permitted() {
        let vetter = vetter_with(StubClassifier::new("PERMIT\nall good"));
        let decision = vetter
            .vet("elevate_privileges", &json!({}), "I really need root")
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.risk_level, RiskLevel::Critical);
        assert!(decision.reason.contains("out-of-band"));
    }

    #[tokio::test]
    async fn test_embedded_credential_in_arguments_blocked() {
        let vetter = vetter_with(StubClassifier::new("PERMIT\nfine"));
        let decision = vetter
            .vet(
                "http_request",
                &json!({"url": "https://api.example.com", "body": "api_key=\"zx9k2m4p8q7r5t3v\""}),
                "call the api",
            )
            .await;
        assert!(!decision.allowed);
        assert!(decision.reason.contains("embedded_credential_kv"));
    }

    #[test]
    fn test_flatten_json_collects_keys_and_values() {
        let flat = flatten_json(&json!({"command": "rm -rf /", "timeout": 5}));
        assert!(flat.contains("command"));
        assert!(flat.contains("rm -rf /"));
        assert!(flat.contains('5'));
    }
}
