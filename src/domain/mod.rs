pub mod binding;
pub mod context;
pub mod decision;
pub mod guard;

pub use binding::{OperationBinding, SpanKind};
pub use context::InvocationContext;
pub use decision::{CallOutcome, Decision, DenyReason};
pub use guard::{FailMode, GuardDefinition, GuardKey, GuardScope, PolicyKind, PolicySpec, Severity};
