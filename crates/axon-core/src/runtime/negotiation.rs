//! Conflict detection and policy-driven negotiation between specialists.
//!
//! A conflict is two or more distinct agents reporting the same concern (at
//! the same location, when one is given) with different severities. The
//! policy picks one winning agent; the losers' findings for that concern are
//! dropped before aggregation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::finding::{Severity, SpecialistReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationPolicy {
    #[default]
    PreferHighestSeverity,
    PreferLowestSeverity,
    /// First agent in the orchestrator's specialist list wins.
    PreferAgentOrder,
}

impl NegotiationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NegotiationPolicy::PreferHighestSeverity => "prefer_highest_severity",
            NegotiationPolicy::PreferLowestSeverity => "prefer_lowest_severity",
            NegotiationPolicy::PreferAgentOrder => "prefer_agent_order",
        }
    }
}

impl fmt::Display for NegotiationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How one conflict was settled. Attached to the summary's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationRecord {
    pub concern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub agents: Vec<String>,
    pub winning_agent: String,
    pub resolution_policy: NegotiationPolicy,
    /// Severity of the winning assessment.
    pub severity: Severity,
}

/// Outcome of [`negotiate`].
#[derive(Debug, Clone, Default)]
pub struct Negotiated {
    pub reports: Vec<SpecialistReport>,
    pub records: Vec<NegotiationRecord>,
}

type ConcernKey = (String, Option<String>);

/// Detect conflicts across `reports` and resolve them under `policy`.
///
/// `agent_order` ranks agents for `prefer_agent_order` and breaks ties for
/// the severity policies; agents missing from it rank after listed ones, by id.
pub fn negotiate(
    reports: &[SpecialistReport],
    policy: NegotiationPolicy,
    agent_order: &[String],
) -> Negotiated {
    // concern -> agent -> strongest severity that agent reported for it
    let mut assessments: BTreeMap<ConcernKey, BTreeMap<String, Severity>> = BTreeMap::new();
    for report in reports {
        for finding in &report.findings {
            let agent = if finding.agent.is_empty() {
                report.agent.clone()
            } else {
                finding.agent.clone()
            };
            let slot = assessments
                .entry((finding.concern.clone(), finding.location.clone()))
                .or_default()
                .entry(agent)
                .or_insert(finding.severity);
            *slot = (*slot).max(finding.severity);
        }
    }

    let rank = |agent: &str| {
        agent_order
            .iter()
            .position(|a| a == agent)
            .unwrap_or(agent_order.len())
    };

    let mut records = Vec::new();
    let mut losers: BTreeMap<ConcernKey, BTreeSet<String>> = BTreeMap::new();

    for (key, by_agent) in assessments {
        let severities: BTreeSet<Severity> = by_agent.values().copied().collect();
        if by_agent.len() < 2 || severities.len() < 2 {
            continue;
        }

        let mut agents: Vec<(&String, Severity)> =
            by_agent.iter().map(|(a, s)| (a, *s)).collect();
        agents.sort_by(|(a, _), (b, _)| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)));

        let winner = match policy {
            NegotiationPolicy::PreferHighestSeverity => agents
                .iter()
                .copied()
                .reduce(|best, next| if next.1 > best.1 { next } else { best }),
            NegotiationPolicy::PreferLowestSeverity => agents
                .iter()
                .copied()
                .reduce(|best, next| if next.1 < best.1 { next } else { best }),
            NegotiationPolicy::PreferAgentOrder => agents.first().copied(),
        };
        let Some((winning_agent, severity)) = winner else {
            continue;
        };

        losers.insert(
            key.clone(),
            agents
                .iter()
                .filter(|(a, _)| *a != winning_agent)
                .map(|(a, _)| (*a).clone())
                .collect(),
        );
        records.push(NegotiationRecord {
            concern: key.0,
            location: key.1,
            agents: agents.iter().map(|(a, _)| (*a).clone()).collect(),
            winning_agent: winning_agent.clone(),
            resolution_policy: policy,
            severity,
        });
    }

    let reports = reports
        .iter()
        .map(|report| {
            let mut report = report.clone();
            report.findings.retain(|f| {
                let agent = if f.agent.is_empty() { &report.agent } else { &f.agent };
                losers
                    .get(&(f.concern.clone(), f.location.clone()))
                    .map_or(true, |dropped| !dropped.contains(agent))
            });
            report
        })
        .collect();

    Negotiated { reports, records }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::finding::Finding;

    fn report(agent: &str, findings: Vec<Finding>) -> SpecialistReport {
        SpecialistReport {
            request_id: "r1".to_string(),
            agent: agent.to_string(),
            status: "ok".to_string(),
            findings: findings.into_iter().map(|f| f.by(agent)).collect(),
            recommendations: vec![],
        }
    }

    fn order() -> Vec<String> {
        vec!["security".to_string(), "performance".to_string()]
    }

    #[test]
    fn highest_severity_wins_and_loser_is_dropped() {
        let reports = vec![
            report(
                "security",
                vec![Finding::new("unbounded_query", Severity::Medium, "no LIMIT")],
            ),
            report(
                "performance",
                vec![
                    Finding::new("unbounded_query", Severity::High, "full scan"),
                    Finding::new("nested_loop", Severity::Low, "O(n^2)"),
                ],
            ),
        ];

        let out = negotiate(&reports, NegotiationPolicy::PreferHighestSeverity, &order());
        assert_eq!(out.records.len(), 1);
        let record = &out.records[0];
        assert_eq!(record.concern, "unbounded_query");
        assert_eq!(record.agents, vec!["security", "performance"]);
        assert_eq!(record.winning_agent, "performance");
        assert_eq!(record.severity, Severity::High);

        assert!(out.reports[0].findings.is_empty());
        assert_eq!(out.reports[1].findings.len(), 2);
    }

    #[test]
    fn lowest_severity_and_agent_order_policies() {
        let reports = vec![
            report("performance", vec![Finding::new("x", Severity::High, "")]),
            report("security", vec![Finding::new("x", Severity::Low, "")]),
        ];

        let low = negotiate(&reports, NegotiationPolicy::PreferLowestSeverity, &order());
        assert_eq!(low.records[0].winning_agent, "security");

        let ordered = negotiate(&reports, NegotiationPolicy::PreferAgentOrder, &order());
        assert_eq!(ordered.records[0].winning_agent, "security");
        assert_eq!(ordered.records[0].severity, Severity::Low);
    }

    #[test]
    fn agreement_or_different_locations_is_not_a_conflict() {
        let reports = vec![
            report(
                "security",
                vec![
                    Finding::new("x", Severity::High, ""),
                    Finding::new("y", Severity::Low, "").at("a.rs:1"),
                ],
            ),
            report(
                "performance",
                vec![
                    Finding::new("x", Severity::High, ""),
                    Finding::new("y", Severity::High, "").at("b.rs:9"),
                ],
            ),
        ];
        let out = negotiate(&reports, NegotiationPolicy::PreferHighestSeverity, &order());
        assert!(out.records.is_empty());
        assert_eq!(out.reports[0].findings.len(), 2);
        assert_eq!(out.reports[1].findings.len(), 2);
    }
}
