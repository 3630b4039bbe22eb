//! Typed signals: topic registry, payload schemas and the pub/sub bus.

pub mod bus;
pub mod error;
pub mod registry;
pub mod schema;

pub use bus::{
    BusConfig, PublishOptions, ReplayOptions, Signal, SignalBus, Subscription, SubscriptionId,
};
pub use error::{FieldViolation, SchemaError, SignalError, SignalResult};
pub use registry::{Topic, TopicRegistry};
pub use schema::{FieldSpec, FieldType, JsonMap, PayloadSchema};
