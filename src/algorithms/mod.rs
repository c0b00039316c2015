pub mod affine;
pub mod correspondence;
pub mod phase_correlation;
pub mod point_detection;
pub mod precision;
pub mod stack_projection;
pub mod threshold;

pub use affine::*;
pub use correspondence::*;
pub use phase_correlation::*;
pub use point_detection::*;
pub use precision::*;
pub use stack_projection::*;
pub use threshold::*;
