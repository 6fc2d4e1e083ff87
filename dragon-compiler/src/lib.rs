pub mod type_system;
pub mod resolver;
pub mod codegen_ast;
pub mod codegen;

pub use resolver::{resolve, ResolveError, Resolved};
pub use codegen::generate;
