//! Standard node library
//!
//! Built-in nodes for common operations. Call [`register_all`] to make them
//! available to an engine's registry.

mod debug;
mod input;
mod math;
mod output;
mod time;
mod transform;

pub use debug::LogNode;
pub use input::ParameterNode;
pub use math::AddNode;
pub use output::ResultNode;
pub use time::{DelayNode, NowNode};
pub use transform::{JsonParseNode, JsonStringifyNode};

use std::sync::Arc;
use weftruntime::NodeRegistry;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(debug::LogNodeFactory));
    registry.register(Arc::new(input::ParameterNodeFactory));
    registry.register(Arc::new(math::AddNodeFactory));
    registry.register(Arc::new(output::ResultNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
    registry.register(Arc::new(time::NowNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::JsonStringifyNodeFactory));
}
