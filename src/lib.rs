pub mod compiler;
pub mod error;
pub mod output;
pub mod project;

pub use compiler::{CompileOptions, Compiler};
pub use error::Error;
