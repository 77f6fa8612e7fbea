//! Method-level guards with trace telemetry.
//!
//! An [`Interceptor`] wraps calls in the guards bound to their operation
//! id (rate limit, circuit breaker, dedup, access gate), evaluates them in
//! declaration order against a sharded state store, and closes exactly one
//! span per attempt describing what happened.

pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod intercept;
pub mod policy;
pub mod resolver;
pub mod runtime;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use domain::{
    CallOutcome, Decision, DenyReason, GuardDefinition, InvocationContext, OperationBinding,
    PolicySpec,
};
pub use error::{ConfigurationError, GuardError, GuardRejected, TelemetryEmissionError};
pub use intercept::{Interceptor, InterceptorBuilder};
pub use resolver::{ConfigResolver, GuardTable};
pub use runtime::GuardRuntime;
