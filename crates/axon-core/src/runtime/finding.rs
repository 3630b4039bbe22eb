//! Findings reported by specialists and the reports that carry them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// One issue a specialist flagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable key findings are grouped and negotiated by, e.g. `sql_injection`.
    pub concern: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Finding {
    pub fn new(concern: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            concern: concern.into(),
            severity,
            message: message.into(),
            agent: String::new(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn by(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }
}

/// Shape action results are read in: `{findings, recommendations}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutput {
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Payload of a specialist's result signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistReport {
    pub request_id: String,
    pub agent: String,
    /// `ok`, or `degraded` when at least one action failed.
    pub status: String,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl SpecialistReport {
    pub fn max_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// Highest severity first; ties keep concern order stable.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.concern.cmp(&b.concern))
            .then_with(|| a.agent.cmp(&b.agent))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn severity_orders_and_parses() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Info);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("severe".parse::<Severity>().is_err());
        assert_eq!(serde_json::to_value(Severity::Medium).unwrap(), json!("medium"));
    }

    #[test]
    fn action_output_defaults_missing_lists() {
        let out: ActionOutput = serde_json::from_value(json!({
            "findings": [{"concern": "n_plus_one", "severity": "high", "message": "query in loop"}]
        }))
        .unwrap();
        assert_eq!(out.findings.len(), 1);
        assert!(out.findings[0].agent.is_empty());
        assert!(out.recommendations.is_empty());
    }

    #[test]
    fn sort_puts_most_severe_first() {
        let mut findings = vec![
            Finding::new("b", Severity::Low, ""),
            Finding::new("a", Severity::Critical, ""),
            Finding::new("c", Severity::Low, ""),
        ];
        sort_findings(&mut findings);
        let order: Vec<_> = findings.iter().map(|f| f.concern.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
