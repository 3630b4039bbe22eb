//! Orchestrator runtime: declarative agent configs reconciled into running
//! specialist and orchestrator instances wired to the signal bus.

pub mod config;
pub mod error;
pub mod finding;
pub mod hooks;
pub mod negotiation;
pub mod orchestrator;
pub mod reconciler;
pub mod specialist;

pub use config::{
    load_file, resolve_agent, resolve_agents, AgentConfig, AgentKind, AgentPlan, ConfigSource,
    OrchestrationConfig, ResolveContext, ResolvedAgent, RestartPolicy, RuntimeSettings,
    SharedConfig, SignalConfig,
};
pub use error::{ConfigError, ConfigResult, RuntimeError, RuntimeResult};
pub use finding::{ActionOutput, Finding, Severity, SpecialistReport};
pub use hooks::{Aggregate, AggregateFn, Classification, ClassifyFn, HookRegistry};
pub use negotiation::{negotiate, NegotiationPolicy, NegotiationRecord};
pub use orchestrator::{Summary, SummaryMetadata, SummaryStatus};
pub use reconciler::{AgentRuntime, AgentRuntimeBuilder, ReconcileReport};
pub use specialist::ACTION_ERROR;
