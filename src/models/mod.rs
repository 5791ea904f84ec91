pub mod geometry;

pub use geometry::{WindowGeometry, DEFAULT_GEOMETRY};
