use serde::{Deserialize, Serialize};

/// Screen-space rectangle in pick-target pixels, origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PickRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PickRegion {
    pub fn point(x: u32, y: u32) -> Self {
        Self {
            x,
            y,
            width: 1,
            height: 1,
        }
    }

    /// Rectangle spanning both corners, inclusive, in any drag direction.
    /// A span covering the whole `u32` range is one pixel short.
    pub fn from_corners(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        let (left, right) = (x0.min(x1), x0.max(x1));
        let (top, bottom) = (y0.min(y1), y0.max(y1));
        Self {
            x: left,
            y: top,
            width: (right - left).saturating_add(1),
            height: (bottom - top).saturating_add(1),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x
            && y >= self.y
            && (x - self.x) < self.width
            && (y - self.y) < self.height
    }

    /// Intersection with a `width` × `height` target; `None` when nothing
    /// remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let clamped = Self {
            x: self.x,
            y: self.y,
            width: self.width.min(width - self.x),
            height: self.height.min(height - self.y),
        };
        (clamped.width > 0 && clamped.height > 0).then_some(clamped)
    }
}

/// Tightly packed RGBA8 pixels read back from a pick target, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBlock {
    pub region: PickRegion,
    pub rgba: Vec<u8>,
}

impl PixelBlock {
    /// Cleared block (transparent black).
    pub fn empty(region: PickRegion) -> Self {
        Self {
            region,
            rgba: vec![0; region.pixel_count() * 4],
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.region.width as usize * 4
    }

    pub fn is_well_formed(&self) -> bool {
        self.rgba.len() == self.region.pixel_count() * 4
    }

    /// Pixel at absolute target coordinates.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if !self.region.contains(x, y) {
            return None;
        }
        let local_x = (x - self.region.x) as usize;
        let local_y = (y - self.region.y) as usize;
        let offset = local_y * self.row_bytes() + local_x * 4;
        let bytes = self.rgba.get(offset..offset + 4)?;
        Some([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if !self.region.contains(x, y) {
            return;
        }
        let local_x = (x - self.region.x) as usize;
        let local_y = (y - self.region.y) as usize;
        let offset = local_y * self.row_bytes() + local_x * 4;
        if let Some(bytes) = self.rgba.get_mut(offset..offset + 4) {
            bytes.copy_from_slice(&rgba);
        }
    }
}
