pub mod actions;
pub mod context;
pub mod error;
pub mod interpreter;
pub mod operand;
pub mod transform;

pub use context::*;
pub use error::*;
pub use interpreter::*;
pub use operand::{Condition, Operand};
pub use transform::*;
