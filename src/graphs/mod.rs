//! Graph definition and compilation for workflow execution.
//!
//! [`GraphBuilder`] collects nodes, edges, and reducer policies, then
//! [`compile`](GraphBuilder::compile)s them into an executable
//! [`App`](crate::app::App).
//!
//! # Core Concepts
//!
//! - **Nodes**: executable units implementing [`Node`](crate::node::Node);
//!   a *deferred* node waits for all incoming edges/branches before running
//! - **Static edges**: unconditional transitions
//! - **Conditional edges**: state-driven routing, optionally bounded by an
//!   [`IterationGuard`] for feedback loops
//! - **Map edges**: dynamic fan-out spawning one branch per item
//! - **Virtual endpoints**: `NodeKind::Start` / `NodeKind::End`
//!
//! # Quick Start
//!
//! ```
//! use loomflow::graphs::GraphBuilder;
//! use loomflow::node::{Node, NodeContext, NodeError, NodeOutput, NodePartial};
//! use loomflow::state::StateSnapshot;
//! use loomflow::types::NodeKind;
//! use async_trait::async_trait;
//!
//! struct Draft;
//!
//! #[async_trait]
//! impl Node for Draft {
//!     fn writes(&self) -> Vec<String> {
//!         vec!["draft".into()]
//!     }
//!     async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
//!         Ok(NodePartial::new()
//!             .with_update("draft", serde_json::json!("first pass"))
//!             .into())
//!     }
//! }
//!
//! // Start (virtual) -> draft -> End (virtual)
//! let app = GraphBuilder::new()
//!     .add_node(NodeKind::Custom("draft".into()), Draft)
//!     .add_edge(NodeKind::Start, NodeKind::Custom("draft".into()))
//!     .add_edge(NodeKind::Custom("draft".into()), NodeKind::End)
//!     .compile()
//!     .expect("valid graph");
//! ```

mod builder;
mod compilation;
mod edges;
mod iteration;

#[cfg(test)]
mod tests;

pub use builder::GraphBuilder;
pub use compilation::{GraphDefinitionError, IncomingSummary};
pub use edges::{ConditionalEdge, Dispatch, EdgePredicate, FanOutFn, IterationGuard, MapEdge};
