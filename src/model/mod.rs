pub mod claims;
pub mod common;
pub mod endpoint;
pub mod service;

pub use claims::*;
pub use common::*;
pub use endpoint::*;
pub use service::*;
