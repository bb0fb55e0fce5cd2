pub mod codegen;
pub mod connection;
pub mod dispatcher;
pub mod executor;
pub mod fallback;
pub mod figma;
pub mod registry;

pub use codegen::{render_component, ComponentCategory, NodeStyle};
pub use connection::{BackoffConfig, ConnectFailure, ConnectionError, ConnectionManager, Connector};
pub use dispatcher::ToolDispatcher;
pub use executor::{ExecutionOutcome, ToolExecutor};
pub use fallback::{FallbackProvider, QueryCategory};
pub use figma::{
    figma_connection, CodegenTool, FigmaConnection, FigmaConnector, GetComponentTool,
    SearchComponentsTool, CODEGEN_REACT_COMPONENT, GET_COMPONENT, SEARCH_COMPONENTS,
};
pub use registry::{ParamSpec, Tool, ToolDefinition, ToolRegistry};
