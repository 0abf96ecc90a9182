//! Workflow runtime: sessions, the scheduler loop, suspension, and
//! checkpoint persistence.
//!
//! # Architecture
//!
//! - **[`AppRunner`]** — drives supersteps for one or more sessions
//! - **[`Checkpoint`] / [`Checkpointer`]** — suspended-run snapshots and
//!   their pluggable storage ([`InMemoryCheckpointer`] built in)
//! - **Persistence models** — serde shapes for checkpoint round-trips
//! - **[`RuntimeConfig`]** — session ids, checkpointer choice, concurrency,
//!   event bus settings
//!
//! # Usage
//!
//! ```rust,no_run
//! use loomflow::runtimes::{AppRunner, CheckpointerType};
//! use loomflow::state::WorkflowState;
//! # use loomflow::app::App;
//! # async fn example(app: App) -> Result<(), Box<dyn std::error::Error>> {
//! let mut runner = AppRunner::new(app, CheckpointerType::InMemory);
//! runner.create_session("session_1".to_string(), WorkflowState::new())?;
//! let outcome = runner.run_until_outcome("session_1").await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpointer;
pub mod persistence;
pub mod runner;
pub mod runtime_config;
mod streaming;

pub use checkpointer::{
    Checkpoint, Checkpointer, CheckpointerError, CheckpointerType, InMemoryCheckpointer,
    restore_session_state,
};
pub use persistence::{
    PersistedActivation, PersistedCheckpoint, PersistedState, PersistedValueChannel,
    PersistedVecChannel, PersistenceError,
};
pub use runner::{AppRunner, DeferredWait, RunOutcome, RunnerError, SessionState};
pub use runtime_config::{EventBusConfig, RuntimeConfig, SinkConfig};
