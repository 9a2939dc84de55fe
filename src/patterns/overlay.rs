//! Site-local pattern overlay.
//!
//! Deployments can layer extra rules over the builtin catalog from a
//! YAML file. Loading produces a complete new catalog; the running one
//! is swapped atomically, never edited.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, info};
use yaml_rust2::{Yaml, YamlLoader};

use super::catalog::{parse_category, parse_stage, PatternRule};

/// Parse overlay YAML documents into pattern rules.
///
/// Expected shape:
///
/// ```yaml
/// rules:
///   - id: internal_hostname
///     regex: "(?i)corp\\.internal"
///     category: probing_command
///     weight: 8
///     stages: [sanitizer, social]
/// ```
fn parse_overlay(docs: &[Yaml]) -> Result<Vec<PatternRule>> {
    let doc = docs.first().context("Empty overlay document")?;

    let rules_yaml = doc["rules"]
        .as_vec()
        .context("Missing or invalid 'rules' key in pattern overlay")?;

    let mut rules = Vec::with_capacity(rules_yaml.len());

    for item in rules_yaml {
        let id = item["id"]
            .as_str()
            .context("Missing 'id' in overlay rule")?
            .to_string();

        let regex_src = item["regex"]
            .as_str()
            .with_context(|| format!("Missing 'regex' in overlay rule '{}'", id))?;
        let regex = Regex::new(regex_src)
            .with_context(|| format!("Invalid regex in overlay rule '{}'", id))?;

        let category = parse_category(
            item["category"]
                .as_str()
                .with_context(|| format!("Missing 'category' in overlay rule '{}'", id))?,
        )?;

        let weight = item["weight"]
            .as_i64()
            .with_context(|| format!("Missing 'weight' in overlay rule '{}'", id))?
            as u32;

        let stages_yaml = item["stages"]
            .as_vec()
            .with_context(|| format!("Missing 'stages' in overlay rule '{}'", id))?;
        let stages = stages_yaml
            .iter()
            .map(|s| {
                parse_stage(
                    s.as_str()
                        .with_context(|| format!("Non-string stage in overlay rule '{}'", id))?,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        rules.push(PatternRule {
            id,
            regex,
            category,
            weight,
            stages,
        });
    }

    Ok(rules)
}

/// Load overlay rules from a YAML file at the given path.
///
/// Returns an empty rule set if the file does not exist.
pub fn load_overlay(path: &Path) -> Result<Vec<PatternRule>> {
    if !path.exists() {
        debug!("No pattern overlay at {}", path.display());
        return Ok(Vec::new());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read pattern overlay from {}", path.display()))?;

    let docs = YamlLoader::load_from_str(&contents)
        .with_context(|| format!("Failed to parse YAML from {}", path.display()))?;

    let rules = parse_overlay(&docs)?;
    info!(
        "Loaded {} overlay pattern rules from {}",
        rules.len(),
        path.display()
    );
    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PatternCategory, Stage};

    const OVERLAY: &str = r#"rules:
  - id: internal_hostname
    regex: "(?i)corp\\.internal"
    category: probing_command
    weight: 8
    stages: [sanitizer, social]
"#;

    #[test]
    fn test_parse_overlay_rule() {
        let docs = YamlLoader::load_from_str(OVERLAY).unwrap();
        let rules = parse_overlay(&docs).unwrap();
        assert_eq!(rules.len(), 1);
        let rule = &rules[0];
        assert_eq!(rule.id, "internal_hostname");
        assert_eq!(rule.category, PatternCategory::ProbingCommand);
        assert_eq!(rule.weight, 8);
        assert_eq!(rule.stages, vec![Stage::Sanitizer, Stage::Social]);
        assert!(rule.regex.is_match("db.CORP.internal"));
    }

    #[test]
    fn test_missing_file_is_empty_overlay() {
        let rules = load_overlay(Path::new("/nonexistent/overlay.yml")).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let bad = r#"rules:
  - id: broken
    regex: "(["
    category: probing_command
    weight: 5
    stages: [vetter]
"#;
        let docs = YamlLoader::load_from_str(bad).unwrap();
        assert!(parse_overlay(&docs).is_err());
    }
}
