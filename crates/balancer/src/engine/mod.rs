//! The balancer: trigger evaluation, idempotent execution, runtime workers.

pub mod evaluator;
pub mod executor;
pub mod safety;
pub mod workers;

pub use evaluator::{evaluate, EvalContext, EvalDecision, SkipReason};
pub use executor::{ExecutionEngine, ProposalGateway, RetryPolicy};
pub use safety::SafetyGate;
