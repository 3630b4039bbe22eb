//! Regex heuristics over diff text.
//!
//! Both scanners flag `unbounded_query`, at different severities, so a deep
//! review of a diff containing one exercises negotiation.

use async_trait::async_trait;
use axon_workflow::{Action, ActionError, ActionResult, JsonMap};
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::runtime::finding::{ActionOutput, Finding, Severity};

/// Lines after a loop header that still count as its body.
const LOOP_WINDOW: usize = 4;

struct Rule {
    concern: &'static str,
    severity: Severity,
    pattern: Regex,
    /// Substring (lowercase) whose presence on the line suppresses the rule.
    unless: Option<&'static str>,
    message: &'static str,
    recommendation: &'static str,
}

impl Rule {
    fn compile(
        concern: &'static str,
        severity: Severity,
        pattern: &str,
        unless: Option<&'static str>,
        message: &'static str,
        recommendation: &'static str,
    ) -> Option<Rule> {
        match Regex::new(pattern) {
            Ok(pattern) => Some(Rule {
                concern,
                severity,
                pattern,
                unless,
                message,
                recommendation,
            }),
            Err(err) => {
                warn!(concern, error = %err, "Skipping scan rule with invalid pattern");
                None
            }
        }
    }

    fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line)
            && self
                .unless
                .map_or(true, |word| !line.to_ascii_lowercase().contains(word))
    }
}

const UNBOUNDED_QUERY: &str = r"(?i)\bselect\s+\*\s+from\s+\w+";

/// Added or context lines of a diff, numbered from 1, with the `+` stripped.
fn code_lines(diff: &str) -> impl Iterator<Item = (usize, &str)> {
    diff.lines().enumerate().filter_map(|(i, line)| {
        if line.starts_with("+++") || line.starts_with("---") || line.starts_with('-') {
            return None;
        }
        Some((i + 1, line.strip_prefix('+').unwrap_or(line)))
    })
}

fn flag(
    out: &mut ActionOutput,
    concern: &str,
    severity: Severity,
    message: &str,
    recommendation: &str,
    line_no: usize,
) {
    out.findings
        .push(Finding::new(concern, severity, message).at(format!("diff:{line_no}")));
    if !out.recommendations.iter().any(|r| r == recommendation) {
        out.recommendations.push(recommendation.to_string());
    }
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Line-oriented regex scanner exposed as an [`Action`].
pub struct DiffScan {
    name: &'static str,
    rules: Vec<Rule>,
    loop_analysis: Option<LoopAnalysis>,
}

struct LoopAnalysis {
    header: Regex,
    query_call: Regex,
}

impl DiffScan {
    pub fn security() -> Self {
        let rules = [
            Rule::compile(
                "sql_injection",
                Severity::High,
                r#"(?i)(\b(select|insert|update|delete)\b[^\n]*["']\s*(\+|%)|format!\(\s*"[^"]*\b(select|insert|update|delete)\b)"#,
                None,
                "SQL statement built from concatenated or formatted input",
                "Use parameterized queries instead of building SQL strings",
            ),
            Rule::compile(
                "hardcoded_secret",
                Severity::Critical,
                r#"(?i)\b(api[_-]?key|secret|password|passwd|token)\b\s*[:=]\s*["'][^"']{6,}["']"#,
                None,
                "Credential literal committed in source",
                "Load credentials from the environment or a secret store",
            ),
            Rule::compile(
                "code_execution",
                Severity::High,
                r"\b(eval|exec)\s*\(",
                None,
                "Dynamic code execution",
                "Avoid eval/exec on data that can be influenced by users",
            ),
            Rule::compile(
                "unbounded_query",
                Severity::Medium,
                UNBOUNDED_QUERY,
                Some("limit"),
                "Unbounded SELECT can be abused to exhaust the database",
                "Bound result sets with LIMIT or pagination",
            ),
        ];
        Self {
            name: "security_scan",
            rules: rules.into_iter().flatten().collect(),
            loop_analysis: None,
        }
    }

    pub fn performance() -> Self {
        let rules = [
            Rule::compile(
                "unbounded_query",
                Severity::High,
                UNBOUNDED_QUERY,
                Some("limit"),
                "Unbounded SELECT performs a full table read",
                "Bound result sets with LIMIT or pagination",
            ),
            Rule::compile(
                "blocking_sleep",
                Severity::Low,
                r"(thread::sleep|time\.sleep)\(",
                None,
                "Blocking sleep on a request path",
                "Use an async timer or move the wait off the request path",
            ),
        ];
        let loop_analysis = match (
            Regex::new(r"^\s*(for|while)\b"),
            Regex::new(r"\.(query|execute|fetch\w*|find\w*)\("),
        ) {
            (Ok(header), Ok(query_call)) => Some(LoopAnalysis { header, query_call }),
            _ => None,
        };
        Self {
            name: "performance_scan",
            rules: rules.into_iter().flatten().collect(),
            loop_analysis,
        }
    }

    pub fn scan(&self, diff: &str) -> ActionOutput {
        let mut out = ActionOutput::default();
        // (line number, indent) of recent loop headers
        let mut loops: Vec<(usize, usize)> = Vec::new();

        for (line_no, line) in code_lines(diff) {
            for rule in &self.rules {
                if rule.matches(line) {
                    flag(
                        &mut out,
                        rule.concern,
                        rule.severity,
                        rule.message,
                        rule.recommendation,
                        line_no,
                    );
                }
            }

            let Some(analysis) = &self.loop_analysis else {
                continue;
            };
            loops.retain(|(start, _)| line_no - start <= LOOP_WINDOW);
            let inside = loops.iter().any(|(_, depth)| indent(line) > *depth);

            if analysis.header.is_match(line) {
                if inside {
                    flag(
                        &mut out,
                        "nested_loop",
                        Severity::Medium,
                        "Nested loop over collections",
                        "Index one side of the loop or precompute a lookup map",
                        line_no,
                    );
                }
                loops.push((line_no, indent(line)));
            } else if inside && analysis.query_call.is_match(line) {
                flag(
                    &mut out,
                    "n_plus_one",
                    Severity::High,
                    "Query issued once per loop iteration",
                    "Batch the lookups into a single query",
                    line_no,
                );
            }
        }
        out
    }
}

#[async_trait]
impl Action for DiffScan {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, params: &JsonMap, _context: &JsonMap) -> ActionResult {
        let diff = match params.get("diff") {
            None | Some(Value::Null) => "",
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(ActionError::new(format!(
                    "diff must be a string, got {other}"
                )))
            }
        };
        Ok(serde_json::to_value(self.scan(diff))?)
    }
}
