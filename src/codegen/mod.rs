//! Compilation of a model into an executable [`Plan`].

pub mod compiler;
pub mod geometry;
pub mod padding;
pub mod permute;
pub mod plan;
pub mod plan_builder;
pub mod planner;
pub mod resolver;

pub use compiler::compile;
pub use plan::{ExecutionBuilder, Plan, Runnable};
pub use plan_builder::PlanBuilder;
pub use planner::Planner;
pub use resolver::{BackendPolicy, BackendResolver};
