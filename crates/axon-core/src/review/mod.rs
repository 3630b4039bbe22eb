//! Reference code-review domain.
//!
//! Topics: `review.request` -> `review.dispatch` -> `review.result` ->
//! `review.summary`. Two regex specialists (`security`, `performance`) and
//! one orchestrator that routes small or hotfix changes down a fast path
//! and large or risky changes through every specialist.

mod scan;

use std::collections::BTreeMap;
use std::sync::Arc;

use axon_workflow::Action;
use serde_json::{json, Value};

pub use scan::DiffScan;

use crate::domain::Domain;
use crate::runtime::config::{AgentConfig, AgentKind, OrchestrationConfig, SignalConfig};
use crate::runtime::finding::Severity;
use crate::runtime::hooks::{Classification, ClassifyFn, MERGE_FINDINGS};
use crate::runtime::negotiation::NegotiationPolicy;
use crate::signal::{FieldType, JsonMap, PayloadSchema, Topic};

pub const REQUEST: &str = "review.request";
pub const DISPATCH: &str = "review.dispatch";
pub const RESULT: &str = "review.result";
pub const SUMMARY: &str = "review.summary";

pub const CLASSIFY: &str = "review.classify";
pub const FAST_PATH: &str = "fast_path";
pub const DEEP_REVIEW: &str = "deep_review";

/// Changes at least this large always get a deep review.
pub const DEEP_REVIEW_FILES: i64 = 50;
pub const RISK_LABELS: [&str; 3] = ["security", "performance", "architecture"];

/// Route a review request.
///
/// `hotfix` intent always takes the fast path; otherwise a large change or a
/// risk label takes the deep path. The fast path consults only the first
/// configured specialist.
pub fn classify(request: &JsonMap, specialists: &[String]) -> Classification {
    let intent = request.get("intent").and_then(Value::as_str).unwrap_or("");
    let files_changed = request
        .get("files_changed")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let risky = request
        .get("labels")
        .and_then(Value::as_array)
        .is_some_and(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .any(|l| RISK_LABELS.contains(&l.to_ascii_lowercase().as_str()))
        });

    let deep = !intent.eq_ignore_ascii_case("hotfix")
        && (files_changed >= DEEP_REVIEW_FILES || risky);

    if deep {
        Classification {
            path: DEEP_REVIEW.to_string(),
            specialists: specialists.to_vec(),
        }
    } else {
        Classification {
            path: FAST_PATH.to_string(),
            specialists: specialists.iter().take(1).cloned().collect(),
        }
    }
}

pub fn topics() -> Vec<Topic> {
    vec![
        Topic::new(
            REQUEST,
            REQUEST,
            PayloadSchema::any()
                .required("files_changed", FieldType::Integer)
                .optional("intent", FieldType::String, Some(json!("change")))
                .optional("labels", FieldType::Array, Some(json!([])))
                .optional("diff", FieldType::String, Some(json!("")))
                .optional("request_id", FieldType::String, None),
        ),
        Topic::new(
            DISPATCH,
            DISPATCH,
            PayloadSchema::any()
                .required("request_id", FieldType::String)
                .required("path", FieldType::String)
                .required("specialists", FieldType::Array)
                .required("payload", FieldType::Object),
        ),
        Topic::new(
            RESULT,
            RESULT,
            PayloadSchema::any()
                .required("request_id", FieldType::String)
                .required("agent", FieldType::String)
                .required("status", FieldType::String)
                .optional("findings", FieldType::Array, Some(json!([])))
                .optional("recommendations", FieldType::Array, Some(json!([]))),
        ),
        Topic::new(
            SUMMARY,
            SUMMARY,
            PayloadSchema::any()
                .required("request_id", FieldType::String)
                .required("path", FieldType::String)
                .required("status", FieldType::String),
        ),
    ]
}

/// `security` and `performance` specialists plus `review_orchestrator`.
pub fn default_agents() -> Vec<AgentConfig> {
    let roles: BTreeMap<String, String> = [
        ("request", REQUEST),
        ("result", RESULT),
        ("dispatch", DISPATCH),
        ("summary", SUMMARY),
    ]
    .into_iter()
    .map(|(role, topic)| (role.to_string(), topic.to_string()))
    .collect();

    vec![
        AgentConfig::specialist("security", &["security_scan"], &[DISPATCH], &[RESULT]),
        AgentConfig::specialist("performance", &["performance_scan"], &[DISPATCH], &[RESULT]),
        AgentConfig {
            id: "review_orchestrator".to_string(),
            kind: AgentKind::Orchestrator,
            actions: vec![],
            signals: SignalConfig {
                subscribes: vec![REQUEST.to_string(), RESULT.to_string()],
                emits: vec![DISPATCH.to_string(), SUMMARY.to_string()],
                roles,
            },
            orchestration: Some(OrchestrationConfig {
                classify_fn: CLASSIFY.to_string(),
                spawn_specialists: vec!["security".to_string(), "performance".to_string()],
                aggregation_fn: MERGE_FINDINGS.to_string(),
                negotiation_policy: NegotiationPolicy::PreferHighestSeverity,
                collect_timeout_ms: None,
                escalate_at: Severity::High,
            }),
        },
    ]
}

/// The review bundle: topics, scan actions and the classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewDomain;

impl Domain for ReviewDomain {
    fn name(&self) -> &str {
        "review"
    }

    fn topics(&self) -> Vec<Topic> {
        topics()
    }

    fn actions(&self) -> Vec<Arc<dyn Action>> {
        let security: Arc<dyn Action> = Arc::new(DiffScan::security());
        let performance: Arc<dyn Action> = Arc::new(DiffScan::performance());
        vec![security, performance]
    }

    fn classifiers(&self) -> Vec<(String, ClassifyFn)> {
        let hook: ClassifyFn = Arc::new(classify);
        vec![(CLASSIFY.to_string(), hook)]
    }
}
