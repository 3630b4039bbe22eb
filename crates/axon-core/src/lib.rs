//! Axon Core Library
//!
//! The agent layer of Axon:
//! - `signal`: topic registry, payload schemas and the in-process pub/sub bus
//! - `runtime`: agent configs, specialist and orchestrator workers, the
//!   reconciliation loop that keeps running agents equal to desired config
//! - `review`: the reference code-review domain
//! - `telemetry`, `metrics`, `obs`: tracing setup and runtime counters

pub mod domain;
pub mod metrics;
pub mod obs;
pub mod review;
pub mod runtime;
pub mod signal;
pub mod telemetry;

pub use domain::Domain;

pub use signal::{
    BusConfig, FieldSpec, FieldType, JsonMap, PayloadSchema, PublishOptions, ReplayOptions,
    SchemaError, Signal, SignalBus, SignalError, SignalResult, Subscription, SubscriptionId,
    Topic, TopicRegistry,
};

pub use runtime::{
    AgentConfig, AgentKind, AgentRuntime, AgentRuntimeBuilder, ConfigError, ConfigSource,
    Finding, HookRegistry, NegotiationPolicy, ReconcileReport, RestartPolicy, RuntimeError,
    RuntimeResult, RuntimeSettings, Severity, SharedConfig, SpecialistReport, Summary,
    SummaryStatus,
};

pub use review::ReviewDomain;

pub use metrics::METRICS;
pub use telemetry::init_tracing;
