pub mod cache;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use cache::*;
pub use memory::*;
pub use postgres::*;
pub use traits::*;
