//! Pixel format and frame geometry

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported pixel formats
///
/// The camera is driven in a single fixed format; the enum exists so the
/// configuration names it explicitly and a second format has somewhere to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// YUV 4:2:0 planar (I420): full-size Y plane, then quarter-size U and V
    #[default]
    Yuv420,
}

impl PixelFormat {
    /// Buffer size of a frame with the given layout
    pub fn frame_size(&self, layout: &FrameLayout) -> usize {
        match self {
            PixelFormat::Yuv420 => layout.y_size() + 2 * layout.chroma_size(),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Yuv420 => write!(f, "YUV420"),
        }
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "YUV420" | "I420" | "YU12" => Ok(PixelFormat::Yuv420),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check if resolution is valid
    pub fn is_valid(&self) -> bool {
        self.width >= 16 && self.width <= 4096 && self.height >= 16 && self.height <= 4096
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Native output of the watchdog camera
    pub const WATCHDOG: Resolution = Resolution {
        width: 950,
        height: 540,
    };
    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Plane geometry of a planar 4:2:0 buffer
///
/// `stride` is the Y row pitch in bytes and may exceed the width; the chroma
/// planes use half of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub resolution: Resolution,
    pub stride: u32,
}

impl FrameLayout {
    pub fn new(resolution: Resolution, stride: u32) -> Self {
        Self { resolution, stride }
    }

    /// Layout with no row padding
    pub fn tight(resolution: Resolution) -> Self {
        Self::new(resolution, resolution.width)
    }

    pub fn chroma_stride(&self) -> u32 {
        self.stride / 2
    }

    pub fn chroma_width(&self) -> u32 {
        self.resolution.width.div_ceil(2)
    }

    pub fn chroma_height(&self) -> u32 {
        self.resolution.height.div_ceil(2)
    }

    pub fn y_size(&self) -> usize {
        self.stride as usize * self.resolution.height as usize
    }

    pub fn chroma_size(&self) -> usize {
        self.chroma_stride() as usize * self.chroma_height() as usize
    }

    /// Whether the stride can hold a full row in every plane
    pub fn is_consistent(&self) -> bool {
        self.stride >= self.resolution.width && self.chroma_stride() >= self.chroma_width()
    }
}
