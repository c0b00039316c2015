pub mod loader;
pub mod transformer;
pub mod writer;

pub use loader::*;
pub use transformer::*;
pub use writer::*;
