//! Named classifier and aggregator hooks that orchestrator configs refer to.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::finding::{sort_findings, Finding, SpecialistReport};
use crate::signal::JsonMap;

/// Built-in aggregator: concatenate findings, dedupe recommendations.
pub const MERGE_FINDINGS: &str = "merge_findings";

/// Built-in classifier: one path, every configured specialist.
pub const ALL_SPECIALISTS: &str = "all_specialists";

/// Which path a request takes and which specialists it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub path: String,
    pub specialists: Vec<String>,
}

/// Unified finding set built from specialist reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub findings: Vec<Finding>,
    pub recommendations: Vec<String>,
}

/// `(request payload, configured specialists) -> classification`
pub type ClassifyFn = Arc<dyn Fn(&JsonMap, &[String]) -> Classification + Send + Sync>;

pub type AggregateFn = Arc<dyn Fn(&[SpecialistReport]) -> Aggregate + Send + Sync>;

/// Resolves `classify_fn` / `aggregation_fn` names at config-load time.
#[derive(Clone)]
pub struct HookRegistry {
    classifiers: BTreeMap<String, ClassifyFn>,
    aggregators: BTreeMap<String, AggregateFn>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("classifiers", &self.classifiers.keys().collect::<Vec<_>>())
            .field("aggregators", &self.aggregators.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HookRegistry {
    /// Registry pre-populated with the built-in hooks.
    pub fn new() -> Self {
        let mut hooks = Self {
            classifiers: BTreeMap::new(),
            aggregators: BTreeMap::new(),
        };
        hooks.register_classifier(ALL_SPECIALISTS, Arc::new(classify_all));
        hooks.register_aggregator(MERGE_FINDINGS, Arc::new(merge_findings));
        hooks
    }

    /// Register or replace a classifier.
    pub fn register_classifier(&mut self, name: impl Into<String>, hook: ClassifyFn) {
        self.classifiers.insert(name.into(), hook);
    }

    /// Register or replace an aggregator.
    pub fn register_aggregator(&mut self, name: impl Into<String>, hook: AggregateFn) {
        self.aggregators.insert(name.into(), hook);
    }

    pub fn classifier(&self, name: &str) -> Option<ClassifyFn> {
        self.classifiers.get(name).cloned()
    }

    pub fn aggregator(&self, name: &str) -> Option<AggregateFn> {
        self.aggregators.get(name).cloned()
    }
}

fn classify_all(_request: &JsonMap, specialists: &[String]) -> Classification {
    Classification {
        path: "default".to_string(),
        specialists: specialists.to_vec(),
    }
}

/// Concatenate every report's findings (most severe first) and keep the
/// first occurrence of each recommendation.
pub fn merge_findings(reports: &[SpecialistReport]) -> Aggregate {
    let mut findings: Vec<Finding> = reports
        .iter()
        .flat_map(|r| {
            r.findings.iter().cloned().map(|mut f| {
                if f.agent.is_empty() {
                    f.agent = r.agent.clone();
                }
                f
            })
        })
        .collect();
    sort_findings(&mut findings);

    let mut recommendations: Vec<String> = Vec::new();
    for rec in reports.iter().flat_map(|r| r.recommendations.iter()) {
        if !recommendations.contains(rec) {
            recommendations.push(rec.clone());
        }
    }

    Aggregate {
        findings,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::finding::Severity;

    #[test]
    fn builtins_are_registered() {
        let hooks = HookRegistry::new();
        assert!(hooks.classifier(ALL_SPECIALISTS).is_some());
        assert!(hooks.aggregator(MERGE_FINDINGS).is_some());
        assert!(hooks.classifier("review.classify").is_none());
    }

    #[test]
    fn merge_sorts_and_dedupes() {
        let reports = vec![
            SpecialistReport {
                request_id: "r".to_string(),
                agent: "a".to_string(),
                status: "ok".to_string(),
                findings: vec![Finding::new("x", Severity::Low, "")],
                recommendations: vec!["add an index".to_string()],
            },
            SpecialistReport {
                request_id: "r".to_string(),
                agent: "b".to_string(),
                status: "ok".to_string(),
                findings: vec![Finding::new("y", Severity::Critical, "")],
                recommendations: vec!["add an index".to_string(), "paginate".to_string()],
            },
        ];
        let agg = merge_findings(&reports);
        assert_eq!(agg.findings[0].concern, "y");
        assert_eq!(agg.findings[0].agent, "b");
        assert_eq!(agg.findings[1].agent, "a");
        assert_eq!(agg.recommendations, vec!["add an index", "paginate"]);
    }
}
