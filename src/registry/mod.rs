pub mod events;
pub mod integrations;
pub mod types;
pub mod workflows;

pub use events::*;
pub use integrations::*;
pub use types::*;
pub use workflows::*;
