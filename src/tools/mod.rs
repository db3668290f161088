//! Client-executed tools.
//!
//! Tools declared by the client in its `config` message are exposed to the
//! language model; invocations are forwarded over the data channel by the
//! [`ToolCallBridge`] and resolved when the client sends back a `tool_result`.

pub mod bridge;
pub mod registry;

pub use bridge::{DEFAULT_TOOL_TIMEOUT, ToolCallBridge, ToolOutcome};
pub use registry::{ClientToolSet, ToolDefinition};
