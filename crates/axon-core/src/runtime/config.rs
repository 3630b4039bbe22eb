//! Declarative agent configuration: loading, validation and resolution.
//!
//! Config entries are plain data. [`resolve_agents`] checks them against the
//! topic, action and hook registries and turns each into a [`ResolvedAgent`]
//! whose actions and hooks are already bound, so unknown identifiers fail at
//! load time and never at invocation time.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axon_state::ContentDigest;
use axon_workflow::{Action, ActionRegistry, JsonMap, OnError, Step, WorkflowSpec};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::{ConfigError, ConfigResult};
use super::finding::Severity;
use super::hooks::{AggregateFn, ClassifyFn, HookRegistry, MERGE_FINDINGS};
use super::negotiation::NegotiationPolicy;
use crate::signal::TopicRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Specialist,
    Orchestrator,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Specialist => "specialist",
            AgentKind::Orchestrator => "orchestrator",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(default)]
    pub subscribes: Vec<String>,
    #[serde(default)]
    pub emits: Vec<String>,
    /// Role name (`request`, `result`, `dispatch`, `summary`) -> topic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roles: BTreeMap<String, String>,
}

fn default_aggregation() -> String {
    MERGE_FINDINGS.to_string()
}

fn default_escalate_at() -> Severity {
    Severity::High
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    pub classify_fn: String,
    pub spawn_specialists: Vec<String>,
    #[serde(default = "default_aggregation")]
    pub aggregation_fn: String,
    #[serde(default)]
    pub negotiation_policy: NegotiationPolicy,
    /// Falls back to [`RuntimeSettings::collect_timeout`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_timeout_ms: Option<u64>,
    #[serde(default = "default_escalate_at")]
    pub escalate_at: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AgentKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default)]
    pub signals: SignalConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestration: Option<OrchestrationConfig>,
}

impl AgentConfig {
    pub fn specialist(
        id: impl Into<String>,
        actions: &[&str],
        subscribes: &[&str],
        emits: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            kind: AgentKind::Specialist,
            actions: actions.iter().map(|s| s.to_string()).collect(),
            signals: SignalConfig {
                subscribes: subscribes.iter().map(|s| s.to_string()).collect(),
                emits: emits.iter().map(|s| s.to_string()).collect(),
                roles: BTreeMap::new(),
            },
            orchestration: None,
        }
    }

    /// Content digest used to detect config changes between reconciliation ticks.
    pub fn digest(&self) -> ContentDigest {
        let bytes = serde_json::to_vec(self).unwrap_or_else(|_| self.id.clone().into_bytes());
        ContentDigest::from_bytes(&bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    #[default]
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub reconcile_interval: Duration,
    pub restart_policy: RestartPolicy,
    pub max_restarts: u32,
    pub collect_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_millis(250),
            restart_policy: RestartPolicy::Always,
            max_restarts: 5,
            collect_timeout: Duration::from_secs(2),
        }
    }
}

/// In-memory config list that can be edited while a runtime reads it.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig(Arc<RwLock<Vec<AgentConfig>>>);

impl SharedConfig {
    pub fn new(agents: Vec<AgentConfig>) -> Self {
        Self(Arc::new(RwLock::new(agents)))
    }

    pub fn snapshot(&self) -> Vec<AgentConfig> {
        self.0.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn replace(&self, agents: Vec<AgentConfig>) {
        *self.0.write().unwrap_or_else(|p| p.into_inner()) = agents;
    }

    pub fn upsert(&self, agent: AgentConfig) {
        let mut agents = self.0.write().unwrap_or_else(|p| p.into_inner());
        match agents.iter_mut().find(|a| a.id == agent.id) {
            Some(slot) => *slot = agent,
            None => agents.push(agent),
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut agents = self.0.write().unwrap_or_else(|p| p.into_inner());
        let before = agents.len();
        agents.retain(|a| a.id != id);
        agents.len() != before
    }
}

/// Where the desired agent population comes from. Re-read on every tick.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    File(PathBuf),
    Static(Vec<AgentConfig>),
    Memory(SharedConfig),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AgentFile {
    List(Vec<AgentConfig>),
    Wrapped { agents: Vec<AgentConfig> },
}

impl ConfigSource {
    pub fn load(&self) -> ConfigResult<Vec<AgentConfig>> {
        match self {
            ConfigSource::File(path) => load_file(path),
            ConfigSource::Static(agents) => Ok(agents.clone()),
            ConfigSource::Memory(shared) => Ok(shared.snapshot()),
        }
    }
}

/// Parse a JSON (bare array or `{"agents": [...]}`) or TOML (`[[agents]]`) file.
pub fn load_file(path: &Path) -> ConfigResult<Vec<AgentConfig>> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let parse_err = |reason: String| ConfigError::Parse {
        path: path.display().to_string(),
        reason,
    };
    let file: AgentFile = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&raw).map_err(|e| parse_err(e.to_string()))?,
        _ => serde_json::from_str(&raw).map_err(|e| parse_err(e.to_string()))?,
    };
    Ok(match file {
        AgentFile::List(agents) | AgentFile::Wrapped { agents } => agents,
    })
}

/// Runtime-ready specialist: actions bound and wrapped as a workflow.
#[derive(Clone)]
pub struct SpecialistPlan {
    pub request_topic: String,
    pub request_wire_type: String,
    pub result_topic: String,
    pub workflow: Arc<WorkflowSpec>,
}

#[derive(Clone)]
pub struct OrchestratorPlan {
    pub request_topic: String,
    pub request_wire_type: String,
    pub result_topic: String,
    pub result_wire_type: String,
    pub dispatch_topic: String,
    pub summary_topic: String,
    pub specialists: Vec<String>,
    pub classify: ClassifyFn,
    pub aggregate: AggregateFn,
    pub policy: NegotiationPolicy,
    pub collect_timeout: Duration,
    pub escalate_at: Severity,
}

#[derive(Clone)]
pub enum AgentPlan {
    Specialist(SpecialistPlan),
    Orchestrator(OrchestratorPlan),
}

/// A validated config entry with everything it names resolved.
#[derive(Clone)]
pub struct ResolvedAgent {
    pub config: AgentConfig,
    pub digest: ContentDigest,
    pub plan: AgentPlan,
}

impl std::fmt::Debug for ResolvedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedAgent")
            .field("id", &self.config.id)
            .field("kind", &self.config.kind)
            .field("digest", &self.digest.short())
            .finish()
    }
}

/// Registries a config is resolved against.
pub struct ResolveContext<'a> {
    pub topics: &'a TopicRegistry,
    pub actions: &'a ActionRegistry,
    pub hooks: &'a HookRegistry,
    pub settings: &'a RuntimeSettings,
}

/// Validate a whole population: unique ids, per-agent checks, and
/// orchestrators naming only configured specialists.
pub fn resolve_agents(
    agents: &[AgentConfig],
    ctx: &ResolveContext<'_>,
) -> ConfigResult<Vec<ResolvedAgent>> {
    let mut seen = HashSet::new();
    for agent in agents {
        if !seen.insert(agent.id.as_str()) {
            return Err(ConfigError::DuplicateAgent {
                agent: agent.id.clone(),
            });
        }
    }
    let specialists: HashSet<&str> = agents
        .iter()
        .filter(|a| a.kind == AgentKind::Specialist)
        .map(|a| a.id.as_str())
        .collect();

    let mut resolved = Vec::with_capacity(agents.len());
    for agent in agents {
        if let Some(orch) = &agent.orchestration {
            if let Some(missing) = orch
                .spawn_specialists
                .iter()
                .find(|s| !specialists.contains(s.as_str()))
            {
                return Err(ConfigError::UnknownSpecialist {
                    agent: agent.id.clone(),
                    specialist: missing.clone(),
                });
            }
        }
        resolved.push(resolve_agent(agent, ctx)?);
    }
    Ok(resolved)
}

/// Validate and bind one config entry.
pub fn resolve_agent(agent: &AgentConfig, ctx: &ResolveContext<'_>) -> ConfigResult<ResolvedAgent> {
    if agent.id.trim().is_empty() {
        return Err(ConfigError::MissingField {
            agent: agent.id.clone(),
            field: "id",
        });
    }

    let signals = &agent.signals;
    for topic in signals.subscribes.iter().chain(signals.emits.iter()) {
        if !ctx.topics.contains(topic) {
            return Err(ConfigError::UnknownTopic {
                agent: agent.id.clone(),
                topic: topic.clone(),
            });
        }
    }
    for (role, topic) in &signals.roles {
        if !signals.subscribes.contains(topic) && !signals.emits.contains(topic) {
            return Err(ConfigError::RoleNotDeclared {
                agent: agent.id.clone(),
                role: role.clone(),
                topic: topic.clone(),
            });
        }
    }

    let plan = match agent.kind {
        AgentKind::Specialist => AgentPlan::Specialist(resolve_specialist(agent, ctx)?),
        AgentKind::Orchestrator => AgentPlan::Orchestrator(resolve_orchestrator(agent, ctx)?),
    };

    Ok(ResolvedAgent {
        config: agent.clone(),
        digest: agent.digest(),
        plan,
    })
}

/// Role topic, falling back to the first subscribed/emitted topic.
fn role_topic(
    agent: &AgentConfig,
    role: &'static str,
    fallback: Option<&String>,
) -> ConfigResult<String> {
    agent
        .signals
        .roles
        .get(role)
        .or(fallback)
        .cloned()
        .ok_or_else(|| ConfigError::MissingRole {
            agent: agent.id.clone(),
            role,
        })
}

fn explicit_role(agent: &AgentConfig, role: &'static str) -> ConfigResult<String> {
    role_topic(agent, role, None)
}

fn resolve_specialist(
    agent: &AgentConfig,
    ctx: &ResolveContext<'_>,
) -> ConfigResult<SpecialistPlan> {
    if agent.actions.is_empty() {
        return Err(ConfigError::MissingField {
            agent: agent.id.clone(),
            field: "actions",
        });
    }
    let request_topic = role_topic(agent, "request", agent.signals.subscribes.first())?;
    let result_topic = role_topic(agent, "result", agent.signals.emits.first())?;

    let actions = agent
        .actions
        .iter()
        .map(|name| ctx.actions.resolve(name))
        .collect::<Result<Vec<Arc<dyn Action>>, _>>()
        .map_err(|source| ConfigError::Action {
            agent: agent.id.clone(),
            source,
        })?;

    let workflow = specialist_workflow(&agent.id, actions).map_err(|source| ConfigError::Action {
        agent: agent.id.clone(),
        source,
    })?;

    Ok(SpecialistPlan {
        request_wire_type: ctx.topics.type_of(&request_topic),
        request_topic,
        result_topic,
        workflow: Arc::new(workflow),
    })
}

/// One independent, continue-on-error step per action, each fed the request payload.
fn specialist_workflow(
    agent_id: &str,
    actions: Vec<Arc<dyn Action>>,
) -> axon_workflow::SpecResult<WorkflowSpec> {
    let steps = actions
        .into_iter()
        .map(|action| {
            Step::new(action.name().to_string(), action)
                .on_error(OnError::Continue)
                .resolve_params(|env| match env.input {
                    Value::Object(map) => map.clone(),
                    _ => JsonMap::new(),
                })
        })
        .collect();
    let mut metadata = JsonMap::new();
    metadata.insert("agent".to_string(), json!(agent_id));
    WorkflowSpec::build(format!("{agent_id}.actions"), steps, vec![], metadata)
}

fn resolve_orchestrator(
    agent: &AgentConfig,
    ctx: &ResolveContext<'_>,
) -> ConfigResult<OrchestratorPlan> {
    let orch = agent
        .orchestration
        .as_ref()
        .ok_or_else(|| ConfigError::MissingOrchestration {
            agent: agent.id.clone(),
        })?;
    if orch.spawn_specialists.is_empty() {
        return Err(ConfigError::MissingField {
            agent: agent.id.clone(),
            field: "orchestration.spawn_specialists",
        });
    }

    let request_topic = explicit_role(agent, "request")?;
    let result_topic = explicit_role(agent, "result")?;
    let dispatch_topic = explicit_role(agent, "dispatch")?;
    let summary_topic = explicit_role(agent, "summary")?;

    let classify = ctx
        .hooks
        .classifier(&orch.classify_fn)
        .ok_or_else(|| ConfigError::UnknownHook {
            agent: agent.id.clone(),
            kind: "classify",
            name: orch.classify_fn.clone(),
        })?;
    let aggregate = ctx
        .hooks
        .aggregator(&orch.aggregation_fn)
        .ok_or_else(|| ConfigError::UnknownHook {
            agent: agent.id.clone(),
            kind: "aggregation",
            name: orch.aggregation_fn.clone(),
        })?;

    Ok(OrchestratorPlan {
        request_wire_type: ctx.topics.type_of(&request_topic),
        result_wire_type: ctx.topics.type_of(&result_topic),
        request_topic,
        result_topic,
        dispatch_topic,
        summary_topic,
        specialists: orch.spawn_specialists.clone(),
        classify,
        aggregate,
        policy: orch.negotiation_policy,
        collect_timeout: orch
            .collect_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(ctx.settings.collect_timeout),
        escalate_at: orch.escalate_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{PayloadSchema, Topic};
    use axon_workflow::action_fn;

    struct Fixture {
        topics: TopicRegistry,
        actions: ActionRegistry,
        hooks: HookRegistry,
        settings: RuntimeSettings,
    }

    impl Fixture {
        fn new() -> Self {
            let topics = TopicRegistry::new();
            for name in ["req", "res", "dispatch", "summary"] {
                topics
                    .register(Topic::new(name, format!("t.{name}"), PayloadSchema::any()))
                    .unwrap();
            }
            let mut actions = ActionRegistry::new();
            actions
                .register(action_fn("scan", |_, _| Ok(json!({}))))
                .unwrap();
            Self {
                topics,
                actions,
                hooks: HookRegistry::new(),
                settings: RuntimeSettings::default(),
            }
        }

        fn ctx(&self) -> ResolveContext<'_> {
            ResolveContext {
                topics: &self.topics,
                actions: &self.actions,
                hooks: &self.hooks,
                settings: &self.settings,
            }
        }
    }

    fn orchestrator() -> AgentConfig {
        AgentConfig {
            id: "lead".to_string(),
            kind: AgentKind::Orchestrator,
            actions: vec![],
            signals: SignalConfig {
                subscribes: vec!["req".to_string(), "res".to_string()],
                emits: vec!["dispatch".to_string(), "summary".to_string()],
                roles: [
                    ("request", "req"),
                    ("result", "res"),
                    ("dispatch", "dispatch"),
                    ("summary", "summary"),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            },
            orchestration: Some(OrchestrationConfig {
                classify_fn: "all_specialists".to_string(),
                spawn_specialists: vec!["sec".to_string()],
                aggregation_fn: default_aggregation(),
                negotiation_policy: NegotiationPolicy::default(),
                collect_timeout_ms: Some(500),
                escalate_at: Severity::High,
            }),
        }
    }

    #[test]
    fn resolves_specialist_and_orchestrator() {
        let fx = Fixture::new();
        let agents = vec![
            AgentConfig::specialist("sec", &["scan"], &["dispatch"], &["res"]),
            orchestrator(),
        ];
        let resolved = resolve_agents(&agents, &fx.ctx()).unwrap();
        assert_eq!(resolved.len(), 2);

        match &resolved[0].plan {
            AgentPlan::Specialist(plan) => {
                assert_eq!(plan.request_topic, "dispatch");
                assert_eq!(plan.result_topic, "res");
                assert_eq!(plan.workflow.steps().len(), 1);
            }
            AgentPlan::Orchestrator(_) => panic!("expected specialist"),
        }
        match &resolved[1].plan {
            AgentPlan::Orchestrator(plan) => {
                assert_eq!(plan.request_wire_type, "t.req");
                assert_eq!(plan.collect_timeout, Duration::from_millis(500));
            }
            AgentPlan::Specialist(_) => panic!("expected orchestrator"),
        }
    }

    #[test]
    fn rejects_unknown_topic_action_and_hook() {
        let fx = Fixture::new();

        let bad_topic = AgentConfig::specialist("sec", &["scan"], &["nope"], &["res"]);
        assert!(matches!(
            resolve_agent(&bad_topic, &fx.ctx()),
            Err(ConfigError::UnknownTopic { .. })
        ));

        let bad_action = AgentConfig::specialist("sec", &["missing"], &["req"], &["res"]);
        assert!(matches!(
            resolve_agent(&bad_action, &fx.ctx()),
            Err(ConfigError::Action { .. })
        ));

        let mut bad_hook = orchestrator();
        if let Some(o) = bad_hook.orchestration.as_mut() {
            o.classify_fn = "nope".to_string();
        }
        assert!(matches!(
            resolve_agent(&bad_hook, &fx.ctx()),
            Err(ConfigError::UnknownHook { .. })
        ));
    }

    #[test]
    fn role_topics_must_be_declared() {
        let fx = Fixture::new();
        let mut agent = AgentConfig::specialist("sec", &["scan"], &["req"], &["res"]);
        agent
            .signals
            .roles
            .insert("request".to_string(), "dispatch".to_string());
        assert!(matches!(
            resolve_agent(&agent, &fx.ctx()),
            Err(ConfigError::RoleNotDeclared { .. })
        ));

        let mut orch = orchestrator();
        orch.signals.roles.remove("summary");
        assert!(matches!(
            resolve_agent(&orch, &fx.ctx()),
            Err(ConfigError::MissingRole { role: "summary", .. })
        ));
    }

    #[test]
    fn population_checks_duplicates_and_specialists() {
        let fx = Fixture::new();
        let dup = vec![
            AgentConfig::specialist("sec", &["scan"], &["req"], &["res"]),
            AgentConfig::specialist("sec", &["scan"], &["req"], &["res"]),
        ];
        assert!(matches!(
            resolve_agents(&dup, &fx.ctx()),
            Err(ConfigError::DuplicateAgent { .. })
        ));

        let orphan = vec![orchestrator()];
        assert!(matches!(
            resolve_agents(&orphan, &fx.ctx()),
            Err(ConfigError::UnknownSpecialist { .. })
        ));
    }

    #[test]
    fn loads_json_and_toml_files() {
        let dir = tempfile::tempdir().unwrap();
        let agents = vec![AgentConfig::specialist("sec", &["scan"], &["req"], &["res"])];

        let bare = dir.path().join("bare.json");
        std::fs::write(&bare, serde_json::to_string(&agents).unwrap()).unwrap();
        assert_eq!(load_file(&bare).unwrap(), agents);

        let wrapped = dir.path().join("wrapped.json");
        std::fs::write(&wrapped, json!({ "agents": agents }).to_string()).unwrap();
        assert_eq!(load_file(&wrapped).unwrap(), agents);

        let toml_path = dir.path().join("agents.toml");
        std::fs::write(
            &toml_path,
            r#"
            [[agents]]
            id = "sec"
            type = "specialist"
            actions = ["scan"]
            [agents.signals]
            subscribes = ["req"]
            emits = ["res"]
            "#,
        )
        .unwrap();
        assert_eq!(load_file(&toml_path).unwrap(), agents);

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(load_file(&broken), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn digest_tracks_content() {
        let a = AgentConfig::specialist("sec", &["scan"], &["req"], &["res"]);
        let mut b = a.clone();
        assert_eq!(a.digest(), b.digest());
        b.actions.push("scan2".to_string());
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn shared_config_edits_are_visible() {
        let shared = SharedConfig::new(vec![]);
        let source = ConfigSource::Memory(shared.clone());
        shared.upsert(AgentConfig::specialist("sec", &["scan"], &["req"], &["res"]));
        assert_eq!(source.load().unwrap().len(), 1);
        assert!(shared.remove("sec"));
        assert!(source.load().unwrap().is_empty());
    }
}
