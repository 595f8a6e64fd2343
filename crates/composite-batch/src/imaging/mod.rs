//! Image fitting: pixel budgets, per-chunk backgrounds, and the resize pool

pub mod background;
pub mod dimensions;
pub mod pool;

pub use background::{BackgroundCache, BackgroundSpec, FittedBackground};
pub use dimensions::{
    fit_dimensions, fit_image, read_dimensions, read_dimensions_from_path, BoundingBox, Fit,
    FittedImage,
};
pub use pool::ResizePool;
