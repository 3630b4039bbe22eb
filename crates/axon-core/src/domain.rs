//! Self-describing bundles of topics, actions and hooks.
//!
//! A domain lets application wiring register everything a use case needs in
//! one call instead of enumerating topics and actions by hand.

use std::sync::Arc;

use axon_workflow::Action;

use crate::runtime::hooks::{AggregateFn, ClassifyFn};
use crate::signal::Topic;

pub trait Domain: Send + Sync {
    fn name(&self) -> &str;

    fn topics(&self) -> Vec<Topic>;

    fn actions(&self) -> Vec<Arc<dyn Action>> {
        Vec::new()
    }

    fn classifiers(&self) -> Vec<(String, ClassifyFn)> {
        Vec::new()
    }

    fn aggregators(&self) -> Vec<(String, AggregateFn)> {
        Vec::new()
    }
}
