use serde::{Deserialize, Serialize};

/// Placement of the workbook window in screen pixels.
///
/// Values may legitimately be negative on multi-monitor layouts with a
/// monitor left of / above the primary one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl WindowGeometry {
    pub const fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// Fallback placement used whenever no saved record can be read.
pub const DEFAULT_GEOMETRY: WindowGeometry = WindowGeometry::new(3355, 0, 488, 1049);

impl Default for WindowGeometry {
    fn default() -> Self {
        DEFAULT_GEOMETRY
    }
}
