//! Conflux Executor
//!
//! Runs locked composite tool workflows. Steps form a DAG; every step whose
//! upstream steps have settled is started, up to a concurrency limit, and
//! results flow into later steps through the template context.
//!
//! ```text
//!   invoke(params) ──► schedule ready steps ──► dispatch to backends
//!                         ▲          │                  │
//!                         │          ▼                  ▼
//!                         │    condition false     onError: abort | continue | retry
//!                         │    → skipped w/ defaults
//!                         └──── settle ◄────────────────┘
//!                                    │
//!                  idle + elicitation ready ──► checkpoint ──► Suspended
//!                                    │                             │
//!                                    ▼                   resume(response)
//!                            output mapping ──► Completed
//! ```
//!
//! Tool steps resolve their tool in the shared aggregated namespace and are
//! dispatched through a [`BackendDispatcher`]. Elicitations are delivered
//! through an [`ElicitationTransport`] and suspend the invocation; its state
//! is saved in a [`CheckpointStore`](conflux_store::CheckpointStore) so it
//! can be resumed later, also from another process.

mod call;
mod config;
mod context;
mod dispatch;
mod error;
mod events;
mod execution;
mod executor;
mod output;
mod result;

pub use config::ExecutorConfig;
pub use dispatch::{
  BackendDispatcher, DeferredElicitation, ElicitationRequest, ElicitationResponse,
  ElicitationTransport, ResponseAction,
};
pub use error::{DispatchError, ExecutionError};
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::WorkflowExecutor;
pub use result::{Outcome, Suspension, WorkflowResult};
