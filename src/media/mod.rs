pub mod operation;
pub mod pipeline;
pub mod probe;
pub mod registry;
pub mod tool;

pub use operation::{MediaDomain, Operation};
pub use pipeline::{PipelineExecutor, PipelineOutput};
pub use probe::MediaInfo;
pub use registry::OperationRegistry;
pub use tool::{CommandRunner, ToolInvocation, ToolOutput, ToolRunner};
