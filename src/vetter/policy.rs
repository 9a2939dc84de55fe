//! Static tool policy tables.
//!
//! Three lists drive the vetting short-circuits: tools that are never
//! allowed, tools that are always safe, and tools whose effects are so
//! severe that only an out-of-band approval flow (not this pipeline) may
//! permit them. Everything else gets a default risk class that decides
//! whether the classifier is consulted.

use crate::types::RiskLevel;

/// Tool names that are always blocked, no further analysis.
pub static DENYLISTED_TOOLS: &[&str] = &[
    "exec_unrestricted",
    "disable_monitor",
    "modify_audit_log",
    "raw_eval",
    "spawn_unsandboxed",
];

/// Read-only, no-side-effect tools: always permitted, classifier never
/// consulted.
pub static ALLOWLISTED_READONLY_TOOLS: &[&str] = &[
    "search_web",
    "get_time",
    "get_weather",
    "list_tools",
    "get_status",
    "calculate",
];

/// Tools whose effects (privilege elevation, secret modification, mass
/// deletion) this pipeline never permits. They require multi-party
/// approval outside this process.
pub static CRITICAL_CLASS_TOOLS: &[&str] = &[
    "elevate_privileges",
    "modify_secret_store",
    "rotate_credentials",
    "mass_delete",
    "wipe_storage",
];

/// Default risk class per known tool. Unknown tools are Medium so they
/// reach the classifier instead of being silently allowed.
static TOOL_RISK_CLASSES: &[(&str, RiskLevel)] = &[
    ("execute_shell", RiskLevel::High),
    ("write_file", RiskLevel::Medium),
    ("read_file", RiskLevel::Medium),
    ("delete_file", RiskLevel::High),
    ("http_request", RiskLevel::Medium),
    ("send_message", RiskLevel::Medium),
    ("send_email", RiskLevel::High),
    ("install_package", RiskLevel::High),
    ("schedule_task", RiskLevel::Medium),
];

pub fn is_denylisted(tool_name: &str) -> bool {
    DENYLISTED_TOOLS.contains(&tool_name)
}

pub fn is_allowlisted(tool_name: &str) -> bool {
    ALLOWLISTED_READONLY_TOOLS.contains(&tool_name)
}

pub fn is_critical_class(tool_name: &str) -> bool {
    CRITICAL_CLASS_TOOLS.contains(&tool_name)
}

/// The default risk class of a tool, before argument evidence.
pub fn risk_class(tool_name: &str) -> RiskLevel {
    if is_critical_class(tool_name) {
        return RiskLevel::Critical;
    }
    TOOL_RISK_CLASSES
        .iter()
        .find(|(name, _)| *name == tool_name)
        .map(|(_, level)| *level)
        .unwrap_or(RiskLevel::Medium)
}
