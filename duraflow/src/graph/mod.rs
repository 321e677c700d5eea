//! Execution graph types: flow nodes, the block-scope stack, and the
//! per-run DAG with its frontier.

mod block_stack;
mod execution;
mod node;

pub use block_stack::{BlockStack, BlockStackError, MAX_BLOCK_DEPTH};
pub use execution::ExecutionGraph;
pub use node::{FlowNode, NodeId, NodeKind, RunOutcome};
