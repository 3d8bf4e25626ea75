pub mod definition;
pub mod engine;
pub mod result;

pub use definition::{DefinitionContext, Implementation, Migration, Procedure, define};
pub use engine::{ExecuteOptions, execute};
pub use result::{ExecutionResult, ExecutionStatus};
