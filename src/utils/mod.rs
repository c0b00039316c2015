pub mod ransac;
pub mod spatial;

pub use ransac::{estimate_affine_ransac, fit_affine, RansacConfig, RansacResult};
pub use spatial::KdTree;
