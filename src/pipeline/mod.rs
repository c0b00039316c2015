pub mod batch;
pub mod orchestrator;
pub mod traits;
pub mod types;

pub use batch::*;
pub use orchestrator::*;
pub use traits::*;
pub use types::*;
