//! Small cooperative-concurrency toolkit shared by the `complete_*` demos:
//! structured task scopes, deferred results, hot and cold streams and a
//! distinct-value state cell, all on top of tokio.

pub mod config;
pub mod deferred;
pub mod error;
pub mod flow;
pub mod log;
pub mod scope;
pub mod shared;
pub mod state;

pub use config::PlaygroundConfig;
pub use deferred::{await_all, await_all_settled, Deferred};
pub use error::{ConfigError, FlowError, TaskError};
pub use flow::{flow, Emitter, Flow, FlowResult, RetryPolicy};
pub use scope::{
    coroutine_scope, run_on, supervisor_scope, with_timeout, with_timeout_or_none, Dispatcher,
    Job, ScopeMode, TaskScope,
};
pub use shared::SharedFlow;
pub use state::StateCell;
