pub mod interceptor;
pub mod membership;
pub mod schedule;
pub mod worker;

pub use interceptor::{Intercepted, MethodInterceptorChain};
pub use membership::Membership;
pub use schedule::{Schedule, compile};
pub use worker::{Worker, WorkerGroupingPolicy, WorkerTask};
