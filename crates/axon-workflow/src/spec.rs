//! Workflow specification: an immutable, validated step DAG.
//!
//! A [`WorkflowSpec`] is built once with [`WorkflowSpec::build`] and never
//! mutated afterwards. Every structural check happens there so that the
//! engine never discovers a malformed spec at run time.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axon_state::ContentDigest;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::action::{Action, JsonMap};
use crate::error::{SpecError, SpecResult};

/// What a step's resolver can see when computing its params.
pub struct StepEnv<'a> {
    pub input: &'a Value,
    /// Results of every step completed so far in this run.
    pub results: &'a BTreeMap<String, Value>,
    pub context: &'a JsonMap,
    pub step: &'a Step,
    pub spec: &'a WorkflowSpec,
}

type ParamsFn = dyn Fn(&StepEnv<'_>) -> JsonMap + Send + Sync;

/// Step parameters: a literal map or a pure function of the [`StepEnv`].
#[derive(Clone)]
pub enum Params {
    Literal(JsonMap),
    Resolver(Arc<ParamsFn>),
}

impl Params {
    pub fn resolve(&self, env: &StepEnv<'_>) -> JsonMap {
        match self {
            Params::Literal(map) => map.clone(),
            Params::Resolver(func) => func(env),
        }
    }
}

impl Default for Params {
    fn default() -> Self {
        Params::Literal(JsonMap::new())
    }
}

impl std::fmt::Debug for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Params::Literal(map) => f.debug_tuple("Literal").field(map).finish(),
            Params::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// How often a step is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::once()
    }
}

/// What happens once a step has exhausted its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Abort the run and report the failure.
    #[default]
    Halt,
    /// Store an error-tagged result and keep going.
    Continue,
}

/// One node of the workflow graph.
#[derive(Clone)]
pub struct Step {
    pub id: String,
    pub action: Arc<dyn Action>,
    pub params: Params,
    pub requires: Vec<String>,
    pub retry: RetryPolicy,
    pub on_error: OnError,
    pub metadata: JsonMap,
}

impl Step {
    pub fn new(id: impl Into<String>, action: Arc<dyn Action>) -> Self {
        Self {
            id: id.into(),
            action,
            params: Params::default(),
            requires: Vec::new(),
            retry: RetryPolicy::default(),
            on_error: OnError::default(),
            metadata: JsonMap::new(),
        }
    }

    pub fn params(mut self, params: JsonMap) -> Self {
        self.params = Params::Literal(params);
        self
    }

    pub fn resolve_params<F>(mut self, func: F) -> Self
    where
        F: Fn(&StepEnv<'_>) -> JsonMap + Send + Sync + 'static,
    {
        self.params = Params::Resolver(Arc::new(func));
        self
    }

    pub fn requires<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requires = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Name of the action this step invokes.
    pub fn action_name(&self) -> &str {
        self.action.name()
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("action", &self.action.name())
            .field("params", &self.params)
            .field("requires", &self.requires)
            .field("retry", &self.retry)
            .field("on_error", &self.on_error)
            .finish()
    }
}

/// What an output transform can see.
pub struct OutputEnv<'a> {
    pub input: &'a Value,
    pub results: &'a BTreeMap<String, Value>,
    pub context: &'a JsonMap,
}

type TransformFn = dyn Fn(&Value, &OutputEnv<'_>) -> Value + Send + Sync;

/// Projection of a completed step's result into the response payload.
#[derive(Clone)]
pub struct Output {
    pub key: String,
    pub from: String,
    pub path: Option<Vec<String>>,
    pub transform: Option<Arc<TransformFn>>,
}

impl Output {
    /// The raw result of step `from`, under `key`.
    pub fn new(key: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            from: from.into(),
            path: None,
            transform: None,
        }
    }

    /// Extract a sub-value by dotted path, e.g. `"findings.0.severity"`.
    pub fn at_path(mut self, path: &str) -> Self {
        self.path = Some(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        );
        self
    }

    /// Post-process the (possibly path-extracted) value.
    pub fn with_transform<F>(mut self, func: F) -> Self
    where
        F: Fn(&Value, &OutputEnv<'_>) -> Value + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(func));
        self
    }

    pub(crate) fn project(&self, result: &Value, env: &OutputEnv<'_>) -> Value {
        let value = match &self.path {
            Some(segments) => lookup_path(result, segments),
            None => result.clone(),
        };
        match &self.transform {
            Some(func) => func(&value, env),
            None => value,
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("key", &self.key)
            .field("from", &self.from)
            .field("path", &self.path)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// Walk objects by key and arrays by index. Missing segments yield `null`.
pub fn lookup_path(value: &Value, segments: &[String]) -> Value {
    let mut current = value;
    for segment in segments {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Immutable, validated description of a step DAG.
#[derive(Clone, Debug)]
pub struct WorkflowSpec {
    name: String,
    steps: Vec<Step>,
    outputs: Vec<Output>,
    metadata: JsonMap,
    version: String,
}

impl WorkflowSpec {
    /// Validate and freeze a workflow.
    ///
    /// Rejects an empty name or step list, duplicate step ids, `requires`
    /// naming unknown steps, outputs projecting from unknown steps, duplicate
    /// output keys and `max_attempts = 0`.
    pub fn build(
        name: impl Into<String>,
        steps: Vec<Step>,
        outputs: Vec<Output>,
        metadata: JsonMap,
    ) -> SpecResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SpecError::EmptyName);
        }
        if steps.is_empty() {
            return Err(SpecError::EmptySteps { workflow: name });
        }

        let mut ids = HashSet::new();
        for step in &steps {
            if !ids.insert(step.id.as_str()) {
                return Err(SpecError::DuplicateStep {
                    workflow: name.clone(),
                    step: step.id.clone(),
                });
            }
            if step.retry.max_attempts == 0 {
                return Err(SpecError::InvalidRetry {
                    step: step.id.clone(),
                    reason: "max_attempts must be at least 1".to_string(),
                });
            }
        }

        for step in &steps {
            if let Some(missing) = step.requires.iter().find(|r| !ids.contains(r.as_str())) {
                return Err(SpecError::UnknownDependency {
                    step: step.id.clone(),
                    missing: missing.clone(),
                });
            }
        }

        let mut keys = HashSet::new();
        for output in &outputs {
            if !ids.contains(output.from.as_str()) {
                return Err(SpecError::UnknownOutputSource {
                    key: output.key.clone(),
                    from: output.from.clone(),
                });
            }
            if !keys.insert(output.key.as_str()) {
                return Err(SpecError::DuplicateOutput {
                    key: output.key.clone(),
                });
            }
        }

        let version = match metadata.get("version") {
            Some(Value::String(v)) if !v.is_empty() => v.clone(),
            Some(v @ Value::Number(_)) => v.to_string(),
            _ => shape_digest(&name, &steps, &outputs),
        };

        Ok(Self {
            name,
            steps,
            outputs,
            metadata,
            version,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Steps in declaration order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn metadata(&self) -> &JsonMap {
        &self.metadata
    }

    /// `metadata.version` when given, otherwise a short digest of the spec's shape.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Digest over everything that changes how the spec executes.
fn shape_digest(name: &str, steps: &[Step], outputs: &[Output]) -> String {
    let shape = json!({
        "name": name,
        "steps": steps.iter().map(|s| json!({
            "id": s.id,
            "action": s.action.name(),
            "requires": s.requires,
            "max_attempts": s.retry.max_attempts,
            "backoff_ms": s.retry.backoff.as_millis() as u64,
            "on_error": s.on_error,
        })).collect::<Vec<_>>(),
        "outputs": outputs.iter().map(|o| &o.key).collect::<Vec<_>>(),
    });
    ContentDigest::from_bytes(shape.to_string().as_bytes())
        .short()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::action_fn;

    fn noop() -> Arc<dyn Action> {
        action_fn("noop", |_, _| Ok(json!({})))
    }

    #[test]
    fn build_rejects_empty_steps() {
        let err = WorkflowSpec::build("w", vec![], vec![], JsonMap::new()).unwrap_err();
        assert!(matches!(err, SpecError::EmptySteps { .. }));
    }

    #[test]
    fn build_rejects_empty_name() {
        let err = WorkflowSpec::build(" ", vec![Step::new("a", noop())], vec![], JsonMap::new())
            .unwrap_err();
        assert_eq!(err, SpecError::EmptyName);
    }

    #[test]
    fn build_rejects_duplicate_ids() {
        let err = WorkflowSpec::build(
            "w",
            vec![Step::new("a", noop()), Step::new("a", noop())],
            vec![],
            JsonMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::DuplicateStep { step, .. } if step == "a"));
    }

    #[test]
    fn build_rejects_unknown_dependency() {
        let err = WorkflowSpec::build(
            "w",
            vec![Step::new("b", noop()).requires(["a"])],
            vec![],
            JsonMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::UnknownDependency { missing, .. } if missing == "a"));
    }

    #[test]
    fn build_rejects_bad_outputs() {
        let err = WorkflowSpec::build(
            "w",
            vec![Step::new("a", noop())],
            vec![Output::new("x", "zzz")],
            JsonMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::UnknownOutputSource { .. }));

        let err = WorkflowSpec::build(
            "w",
            vec![Step::new("a", noop())],
            vec![Output::new("x", "a"), Output::new("x", "a")],
            JsonMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::DuplicateOutput { .. }));
    }

    #[test]
    fn build_rejects_zero_attempts() {
        let err = WorkflowSpec::build(
            "w",
            vec![Step::new("a", noop()).retry(RetryPolicy::new(0, Duration::ZERO))],
            vec![],
            JsonMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::InvalidRetry { .. }));
    }

    #[test]
    fn version_prefers_metadata_then_digest() {
        let mut meta = JsonMap::new();
        meta.insert("version".to_string(), json!("2024.1"));
        let spec = WorkflowSpec::build("w", vec![Step::new("a", noop())], vec![], meta).unwrap();
        assert_eq!(spec.version(), "2024.1");

        let a = WorkflowSpec::build("w", vec![Step::new("a", noop())], vec![], JsonMap::new())
            .unwrap();
        let b = WorkflowSpec::build("w", vec![Step::new("a", noop())], vec![], JsonMap::new())
            .unwrap();
        let c = WorkflowSpec::build(
            "w",
            vec![Step::new("a", noop()).on_error(OnError::Continue)],
            vec![],
            JsonMap::new(),
        )
        .unwrap();
        assert_eq!(a.version(), b.version());
        assert_ne!(a.version(), c.version());
    }

    #[test]
    fn lookup_path_walks_objects_and_arrays() {
        let value = json!({"findings": [{"severity": "high"}]});
        let out = Output::new("sev", "a").at_path("findings.0.severity");
        let segments = out.path.clone().unwrap();
        assert_eq!(lookup_path(&value, &segments), json!("high"));

        let missing = Output::new("x", "a").at_path("findings.3.severity");
        assert_eq!(lookup_path(&value, &missing.path.unwrap()), Value::Null);
    }
}
