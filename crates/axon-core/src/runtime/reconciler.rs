//! Agent runtime: reconciles the desired agent population against running
//! instances.
//!
//! Each tick re-reads the config source, then
//! - tears down instances whose entry vanished or changed,
//! - replaces instances that died (per [`RestartPolicy`]),
//! - spawns an instance for every entry without one.
//!
//! Instances never hold a sender to their own mailbox: once every bus
//! subscription feeding it is gone the mailbox closes, the loop exits and the
//! next tick sees the instance as dead.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use axon_state::{ContentDigest, SnapshotStore};
use axon_workflow::{ActionRegistry, WorkflowEngine};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use super::config::{
    resolve_agents, AgentKind, AgentPlan, ConfigSource, ResolveContext, ResolvedAgent,
    RestartPolicy, RuntimeSettings,
};
use super::error::RuntimeResult;
use super::hooks::HookRegistry;
use super::orchestrator::OrchestratorWorker;
use super::specialist::SpecialistWorker;
use crate::domain::Domain;
use crate::metrics::METRICS;
use crate::obs::{self, AgentSpan};
use crate::signal::{SignalBus, SubscriptionId};

/// Floor for [`RuntimeSettings::reconcile_interval`]; a zero period would spin.
const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(1);

/// What one reconciliation pass changed. Lists hold agent ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub spawned: Vec<String>,
    pub stopped: Vec<String>,
    pub updated: Vec<String>,
    pub restarted: Vec<String>,
    /// Dead instances left down by the restart policy.
    pub abandoned: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.spawned.is_empty()
            && self.stopped.is_empty()
            && self.updated.is_empty()
            && self.restarted.is_empty()
            && self.abandoned.is_empty()
    }
}

struct AgentInstance {
    digest: ContentDigest,
    subscriptions: Vec<SubscriptionId>,
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

#[derive(Default)]
struct RuntimeState {
    instances: BTreeMap<String, AgentInstance>,
    restarts: HashMap<String, u32>,
    /// Dead instances not restarted, keyed to the config digest they died with.
    abandoned: HashMap<String, ContentDigest>,
}

/// Builder for [`AgentRuntime`].
pub struct AgentRuntimeBuilder {
    bus: Arc<SignalBus>,
    source: ConfigSource,
    actions: ActionRegistry,
    hooks: HookRegistry,
    store: Option<Arc<dyn SnapshotStore>>,
    settings: RuntimeSettings,
    engine: WorkflowEngine,
}

impl AgentRuntimeBuilder {
    pub fn actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = hooks;
        self
    }

    /// Register a domain's actions and hooks. Its topics belong in the bus registry.
    pub fn domain(mut self, domain: &dyn Domain) -> RuntimeResult<Self> {
        for action in domain.actions() {
            self.actions
                .register(action)
                .map_err(|source| super::error::ConfigError::Action {
                    agent: domain.name().to_string(),
                    source,
                })?;
        }
        for (name, hook) in domain.classifiers() {
            self.hooks.register_classifier(name, hook);
        }
        for (name, hook) in domain.aggregators() {
            self.hooks.register_aggregator(name, hook);
        }
        Ok(self)
    }

    pub fn store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn engine(mut self, engine: WorkflowEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn build(self) -> AgentRuntime {
        AgentRuntime {
            bus: self.bus,
            source: self.source,
            actions: self.actions,
            hooks: self.hooks,
            store: self.store,
            settings: self.settings,
            engine: self.engine,
            state: Mutex::new(RuntimeState::default()),
        }
    }
}

pub struct AgentRuntime {
    bus: Arc<SignalBus>,
    source: ConfigSource,
    actions: ActionRegistry,
    hooks: HookRegistry,
    store: Option<Arc<dyn SnapshotStore>>,
    settings: RuntimeSettings,
    engine: WorkflowEngine,
    state: Mutex<RuntimeState>,
}

impl AgentRuntime {
    pub fn builder(bus: Arc<SignalBus>, source: ConfigSource) -> AgentRuntimeBuilder {
        AgentRuntimeBuilder {
            bus,
            source,
            actions: ActionRegistry::new(),
            hooks: HookRegistry::new(),
            store: None,
            settings: RuntimeSettings::default(),
            engine: WorkflowEngine::new(),
        }
    }

    pub fn bus(&self) -> &Arc<SignalBus> {
        &self.bus
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Load and validate the current desired population without touching instances.
    pub fn desired(&self) -> RuntimeResult<Vec<ResolvedAgent>> {
        let configs = self.source.load()?;
        let ctx = ResolveContext {
            topics: self.bus.registry(),
            actions: &self.actions,
            hooks: &self.hooks,
            settings: &self.settings,
        };
        let mut resolved = resolve_agents(&configs, &ctx)?;
        // Specialists first so they are listening before any dispatch.
        resolved.sort_by_key(|r| r.config.kind == AgentKind::Orchestrator);
        Ok(resolved)
    }

    /// One reconciliation pass. A config that fails to load or validate
    /// leaves the running population untouched.
    pub async fn reconcile(&self) -> RuntimeResult<ReconcileReport> {
        let desired = match self.desired() {
            Ok(d) => d,
            Err(err) => {
                warn!(error = %err, "Agent config rejected; keeping current population");
                return Err(err);
            }
        };
        let desired: BTreeMap<String, ResolvedAgent> = desired
            .into_iter()
            .map(|r| (r.config.id.clone(), r))
            .collect();

        let mut state = self.state.lock().await;
        let mut report = ReconcileReport::default();

        // Vanished entries.
        let gone: Vec<String> = state
            .instances
            .keys()
            .filter(|id| !desired.contains_key(*id))
            .cloned()
            .collect();
        for id in gone {
            if let Some(instance) = state.instances.remove(&id) {
                self.teardown(&id, instance, "removed from config");
            }
            state.restarts.remove(&id);
            report.stopped.push(id);
        }
        state.abandoned.retain(|id, _| desired.contains_key(id));

        // Changed entries.
        let changed: Vec<String> = state
            .instances
            .iter()
            .filter(|(id, inst)| desired.get(*id).is_some_and(|d| d.digest != inst.digest))
            .map(|(id, _)| id.clone())
            .collect();
        for id in changed {
            if let Some(instance) = state.instances.remove(&id) {
                self.teardown(&id, instance, "config changed");
            }
            state.restarts.remove(&id);
            if let Some(agent) = desired.get(&id) {
                let instance = self.spawn_instance(agent)?;
                state.instances.insert(id.clone(), instance);
            }
            report.updated.push(id);
        }

        // Dead instances.
        let dead: Vec<String> = state
            .instances
            .iter()
            .filter(|(_, inst)| self.is_dead(inst))
            .map(|(id, _)| id.clone())
            .collect();
        for id in dead {
            let Some(instance) = state.instances.remove(&id) else {
                continue;
            };
            let digest = instance.digest.clone();
            self.teardown(&id, instance, "instance died");

            let restarts = state.restarts.get(&id).copied().unwrap_or(0);
            let allowed = self.settings.restart_policy == RestartPolicy::Always
                && restarts < self.settings.max_restarts;
            match desired.get(&id) {
                Some(agent) if allowed => {
                    let instance = self.spawn_instance(agent)?;
                    state.instances.insert(id.clone(), instance);
                    state.restarts.insert(id.clone(), restarts + 1);
                    METRICS.inc_agents_restarted();
                    obs::emit_agent_restarted(&id, restarts + 1);
                    report.restarted.push(id);
                }
                _ => {
                    warn!(agent_id = %id, restarts, policy = ?self.settings.restart_policy, "Agent died and will not be restarted");
                    state.abandoned.insert(id.clone(), digest);
                    report.abandoned.push(id);
                }
            }
        }

        // Missing entries.
        for (id, agent) in &desired {
            if state.instances.contains_key(id) {
                continue;
            }
            match state.abandoned.get(id) {
                Some(digest) if *digest == agent.digest => continue,
                Some(_) => {
                    // A new config revision gets a fresh restart budget.
                    state.abandoned.remove(id);
                    state.restarts.remove(id);
                }
                None => {}
            }
            let instance = self.spawn_instance(agent)?;
            state.instances.insert(id.clone(), instance);
            report.spawned.push(id.clone());
        }

        if !report.is_noop() {
            info!(
                spawned = ?report.spawned,
                stopped = ?report.stopped,
                updated = ?report.updated,
                restarted = ?report.restarted,
                abandoned = ?report.abandoned,
                "Reconciled agents"
            );
        }
        Ok(report)
    }

    /// Reconcile on the configured interval until `shutdown` flips, then stop every instance.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.reconcile_interval.max(MIN_RECONCILE_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    // Errors are already logged; the population stays as it was.
                    let _ = self.reconcile().await;
                }
            }
        }
        self.shutdown().await;
        METRICS.flush();
    }

    /// Ids of instances currently alive, sorted.
    pub async fn running_agents(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .instances
            .iter()
            .filter(|(_, inst)| !self.is_dead(inst))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn subscriptions_of(&self, agent_id: &str) -> Vec<SubscriptionId> {
        let state = self.state.lock().await;
        state
            .instances
            .get(agent_id)
            .map(|i| i.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Stop every instance.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let instances = std::mem::take(&mut state.instances);
        for (id, instance) in instances {
            self.teardown(&id, instance, "runtime shutdown");
        }
    }

    fn is_dead(&self, instance: &AgentInstance) -> bool {
        instance.handle.is_finished()
            || instance
                .subscriptions
                .iter()
                .any(|id| !self.bus.is_subscribed(*id))
    }

    fn spawn_instance(&self, agent: &ResolvedAgent) -> RuntimeResult<AgentInstance> {
        let id = agent.config.id.clone();
        let kind = agent.config.kind;
        let _span = AgentSpan::enter(&id, kind.as_str());

        let (tx, mailbox) = mpsc::unbounded_channel();
        let mut subscriptions = Vec::new();
        for topic in &agent.config.signals.subscribes {
            match self.bus.subscribe_into(topic, tx.clone()) {
                Ok(sub) => subscriptions.push(sub),
                Err(err) => {
                    for sub in subscriptions {
                        self.bus.unsubscribe(sub);
                    }
                    return Err(err.into());
                }
            }
        }
        drop(tx);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let span = tracing::info_span!("axon.agent", agent_id = %id, kind = %kind.as_str());
        let handle = match &agent.plan {
            AgentPlan::Specialist(plan) => {
                let worker = SpecialistWorker {
                    agent_id: id.clone(),
                    plan: plan.clone(),
                    bus: Arc::clone(&self.bus),
                    engine: self.engine.clone(),
                    store: self.store.clone(),
                };
                tokio::spawn(worker.run(mailbox, shutdown_rx).instrument(span))
            }
            AgentPlan::Orchestrator(plan) => {
                let worker = OrchestratorWorker {
                    agent_id: id.clone(),
                    plan: plan.clone(),
                    bus: Arc::clone(&self.bus),
                };
                tokio::spawn(worker.run(mailbox, shutdown_rx).instrument(span))
            }
        };

        METRICS.inc_agents_spawned();
        obs::emit_agent_spawned(&id, kind.as_str(), subscriptions.len());
        Ok(AgentInstance {
            digest: agent.digest.clone(),
            subscriptions,
            handle,
            shutdown,
        })
    }

    fn teardown(&self, id: &str, instance: AgentInstance, reason: &str) {
        for sub in &instance.subscriptions {
            self.bus.unsubscribe(*sub);
        }
        // A worker mid-request finishes it before observing the flag.
        let _ = instance.shutdown.send(true);
        obs::emit_agent_stopped(id, reason);
    }
}
