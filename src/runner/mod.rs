pub mod config;
pub mod context;
pub mod display;
pub mod executor;
pub mod invoker;
pub mod lifecycle;
pub mod listener;
pub mod pool;
pub mod report;
pub mod result;

pub use config::RunConfig;
pub use executor::{RunError, RunErrorKind, SuiteResult, TestRunResult, TestRunner};
pub use listener::{Capability, Listener, ListenerRegistry};
pub use result::{FailureCause, FailureKind, Outcome, RunSummary, UnitResult};
