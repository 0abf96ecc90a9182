//! # Loomflow: Graph-driven Workflow Orchestration Engine
//!
//! Loomflow compiles a directed graph of computation nodes and edges into
//! an executable application, runs it against a shared keyed state with
//! per-key reducer policies, and supports the patterns agent-style
//! document pipelines actually need: dynamic fan-out/fan-in over
//! variable-length collections, bounded feedback loops with convergence
//! checks, and suspending a run mid-flight to await external (human) input
//! before resuming from the exact suspension point.
//!
//! ## Core Concepts
//!
//! - **Nodes**: async units of work reading a state snapshot and returning
//!   a partial update — or an interrupt request
//! - **State**: keyed, versioned values merged through declared reducer
//!   policies (`overwrite`, `merge-by-subkey`, `append`, `increment`)
//! - **Edges**: static, conditional (with optional iteration guards), and
//!   map (dynamic fan-out) transitions
//! - **Deferred nodes**: join points that wait for every incoming edge and
//!   branch before executing
//! - **Checkpoints**: explicit serializable snapshots of suspended runs
//!
//! ## Building a Workflow
//!
//! ```
//! use loomflow::graphs::GraphBuilder;
//! use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
//! use loomflow::reducers::ReducerPolicy;
//! use loomflow::state::StateSnapshot;
//! use loomflow::types::NodeKind;
//! use async_trait::async_trait;
//! use serde_json::json;
//!
//! struct Outline;
//!
//! #[async_trait]
//! impl Node for Outline {
//!     fn writes(&self) -> Vec<String> {
//!         vec!["outline".into()]
//!     }
//!
//!     async fn run(&self, _: StateSnapshot, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
//!         ctx.emit("outline", "drafting outline")?;
//!         Ok(NodePartial::new()
//!             .with_update("outline", json!(["intro", "experience", "skills"]))
//!             .into())
//!     }
//! }
//!
//! let app = GraphBuilder::new()
//!     .add_node(NodeKind::Custom("outline".into()), Outline)
//!     .add_edge(NodeKind::Start, NodeKind::Custom("outline".into()))
//!     .add_edge(NodeKind::Custom("outline".into()), NodeKind::End)
//!     .with_policy("outline", ReducerPolicy::Overwrite)
//!     .compile()
//!     .expect("valid graph");
//! ```
//!
//! ## Running, Suspending, Resuming
//!
//! [`App::invoke`](app::App::invoke) drives a run to a
//! [`RunOutcome`](runtimes::RunOutcome): either the final state, or a
//! checkpoint plus interrupt payload when a node requested external input.
//! [`App::resume`](app::App::resume) continues a suspended run with the
//! supplied response; [`App::stream`](app::App::stream) exposes a finite
//! feed of per-superstep events.
//!
//! ## Module Guide
//!
//! - [`state`] - keyed versioned state and snapshots
//! - [`node`] - node trait and execution primitives
//! - [`control`] - interrupt request/response types
//! - [`reducers`] - merge policies and conflict detection
//! - [`graphs`] - graph definition and compilation
//! - [`schedulers`] - concurrent superstep execution
//! - [`app`] - compiled graph and public run surface
//! - [`runtimes`] - sessions, suspension, checkpoint persistence
//! - [`event_bus`] - structured events, sinks, stream subscriptions
//! - [`telemetry`] - tracing setup and formatters

pub mod app;
pub mod channels;
pub mod control;
pub mod event_bus;
pub mod graphs;
pub mod node;
pub mod reducers;
pub mod runtimes;
pub mod schedulers;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod utils;
