pub mod builder;
pub mod engine;
pub mod router;
pub mod types;

pub use builder::{create_graph_from_config, create_llm_from_config, WorkflowBuilder};
pub use engine::WorkflowEngine;
pub use router::{route, route_token};
pub use types::*;
