//! Color-coded GPU picking.
//!
//! Ids are dense and rebuilt from registry order after every reconciliation:
//! a pickable proxy's id is its registry index. Plate handles and gizmo
//! handles live in fixed bands at the top of the 24-bit space so they can
//! never collide with proxies.

pub mod codec;
mod readback;

use std::collections::BTreeSet;

use glam::Mat4;
use rayon::prelude::*;
use thiserror::Error;

use crate::registry::Registry;

pub use readback::{PickRegion, PixelBlock};

/// Exclusive upper bound of the proxy band.
pub const MAX_PROXY_IDS: u32 = 0xFE_0000;
pub const PLATE_BAND_START: u32 = MAX_PROXY_IDS;
pub const HANDLES_PER_PLATE: u32 = 16;
pub const MAX_PLATES: u32 = 4096;
pub const GIZMO_BAND_START: u32 = PLATE_BAND_START + MAX_PLATES * HANDLES_PER_PLATE;
pub const MAX_GIZMO_HANDLES: u32 = codec::ID_SPACE - GIZMO_BAND_START;

/// Entity resolved from one pick pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PickHit {
    Proxy(usize),
    PlateHandle { plate: u32, slot: u32 },
    Gizmo(u32),
}

impl PickHit {
    pub fn proxy(self) -> Option<usize> {
        match self {
            PickHit::Proxy(index) => Some(index),
            _ => None,
        }
    }
}

/// Interactive handle outside the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandleId {
    Plate { plate: u32, slot: u32 },
    Gizmo(u32),
}

impl From<HandleId> for PickHit {
    fn from(handle: HandleId) -> Self {
        match handle {
            HandleId::Plate { plate, slot } => PickHit::PlateHandle { plate, slot },
            HandleId::Gizmo(slot) => PickHit::Gizmo(slot),
        }
    }
}

/// Geometry drawn into the pick pass for a plate or gizmo handle. Owns its
/// buffer like a proxy does.
#[derive(Debug)]
pub struct PickHandle<B> {
    pub id: HandleId,
    pub world: Mat4,
    pub buffer: B,
}

/// One flat-colored draw of the pick pass.
#[derive(Debug)]
pub struct PickDraw<'a, B> {
    pub hit: PickHit,
    pub color: [u8; 4],
    pub world: Mat4,
    pub buffer: &'a B,
}

#[derive(Debug, Error)]
pub enum PickSurfaceError {
    #[error("pick region {region:?} lies outside the {width}x{height} target")]
    RegionOutOfBounds {
        region: PickRegion,
        width: u32,
        height: u32,
    },
    #[error("pick readback failed: {0}")]
    Readback(String),
    #[error("pick target unavailable: {0}")]
    Device(String),
}

/// Rendering backend seam for the pick pass.
///
/// Implementations render `draws` into an offscreen target cleared to
/// transparent black, with depth testing on and blending and multisampling
/// off, then read back exactly `region`.
pub trait PickSurface<B> {
    fn target_size(&self) -> (u32, u32);

    fn render_pick_pass(
        &mut self,
        draws: &[PickDraw<'_, B>],
        view_projection: Mat4,
        region: PickRegion,
    ) -> Result<PixelBlock, PickSurfaceError>;
}

/// Pick ids valid for the current registry order.
#[derive(Debug, Clone, Default)]
pub struct PickTable {
    pickable: Vec<bool>,
    plate_count: u32,
    gizmo_handles: u32,
}

impl PickTable {
    pub fn assign<B>(registry: &Registry<B>, plate_count: usize, gizmo_handles: usize) -> Self {
        let limit = MAX_PROXY_IDS as usize;
        if registry.len() > limit {
            log::warn!(
                "[plater_scene] {} proxies exceed the pick id band; {} will not be pickable",
                registry.len(),
                registry.len() - limit
            );
        }
        let mut pickable = vec![false; registry.len()];
        for index in registry.selectable_indices().take_while(|&index| index < limit) {
            pickable[index] = true;
        }
        Self {
            pickable,
            plate_count: (plate_count as u32).min(MAX_PLATES),
            gizmo_handles: (gizmo_handles as u32).min(MAX_GIZMO_HANDLES),
        }
    }

    pub fn proxy_count(&self) -> usize {
        self.pickable.len()
    }

    pub fn pickable_count(&self) -> usize {
        self.pickable.iter().filter(|p| **p).count()
    }

    pub fn is_pickable(&self, index: usize) -> bool {
        self.pickable.get(index).copied().unwrap_or(false)
    }

    pub fn proxy_color(&self, index: usize) -> Option<[u8; 4]> {
        if !self.is_pickable(index) {
            return None;
        }
        codec::encode(index as u32)
    }

    pub fn plate_handle_color(&self, plate: u32, slot: u32) -> Option<[u8; 4]> {
        if plate >= self.plate_count || slot >= HANDLES_PER_PLATE {
            return None;
        }
        codec::encode(PLATE_BAND_START + plate * HANDLES_PER_PLATE + slot)
    }

    pub fn gizmo_color(&self, slot: u32) -> Option<[u8; 4]> {
        if slot >= self.gizmo_handles {
            return None;
        }
        codec::encode(GIZMO_BAND_START + slot)
    }

    pub fn handle_color(&self, handle: HandleId) -> Option<[u8; 4]> {
        match handle {
            HandleId::Plate { plate, slot } => self.plate_handle_color(plate, slot),
            HandleId::Gizmo(slot) => self.gizmo_color(slot),
        }
    }

    /// Draw list for the pick pass: proxies in registry order, then the
    /// handles that fit the current bands.
    pub fn draws<'a, B>(
        &self,
        registry: &'a Registry<B>,
        handles: &'a [PickHandle<B>],
    ) -> Vec<PickDraw<'a, B>> {
        let proxies = registry.iter().enumerate().filter_map(|(index, proxy)| {
            let color = self.proxy_color(index)?;
            let buffer = proxy.buffer()?;
            Some(PickDraw {
                hit: PickHit::Proxy(index),
                color,
                world: proxy.world_transform(),
                buffer,
            })
        });
        let handles = handles.iter().filter_map(|handle| {
            let color = self.handle_color(handle.id)?;
            Some(PickDraw {
                hit: handle.id.into(),
                color,
                world: handle.world,
                buffer: &handle.buffer,
            })
        });
        proxies.chain(handles).collect()
    }

    /// Map a decoded id back to an entity. Ids outside the current table
    /// (a stale frame) resolve to `None`.
    pub fn resolve(&self, id: u32) -> Option<PickHit> {
        if id < MAX_PROXY_IDS {
            let index = id as usize;
            return self.is_pickable(index).then_some(PickHit::Proxy(index));
        }
        if id < GIZMO_BAND_START {
            let offset = id - PLATE_BAND_START;
            let plate = offset / HANDLES_PER_PLATE;
            let slot = offset % HANDLES_PER_PLATE;
            return (plate < self.plate_count).then_some(PickHit::PlateHandle { plate, slot });
        }
        let slot = id - GIZMO_BAND_START;
        (slot < self.gizmo_handles).then_some(PickHit::Gizmo(slot))
    }

    pub fn decode_pixel(&self, rgba: [u8; 4]) -> Option<PickHit> {
        codec::decode(rgba).and_then(|id| self.resolve(id))
    }

    pub fn decode_point(&self, block: &PixelBlock, x: u32, y: u32) -> Option<PickHit> {
        block.pixel(x, y).and_then(|rgba| self.decode_pixel(rgba))
    }

    /// Every valid entity in `block`. Scanlines are decoded in parallel once
    /// the block holds at least `parallel_min_pixels` pixels.
    pub fn decode_rect(&self, block: &PixelBlock, parallel_min_pixels: usize) -> BTreeSet<PickHit> {
        let row_bytes = block.row_bytes();
        if row_bytes == 0 || !block.is_well_formed() {
            return BTreeSet::new();
        }
        let decode_rows = |rows: &[u8]| -> BTreeSet<PickHit> {
            rows.chunks_exact(4)
                .filter_map(|px| self.decode_pixel([px[0], px[1], px[2], px[3]]))
                .collect()
        };
        if block.region.pixel_count() < parallel_min_pixels {
            return decode_rows(&block.rgba);
        }
        block
            .rgba
            .par_chunks(row_bytes)
            .map(decode_rows)
            .reduce_with(|mut merged, rows| {
                merged.extend(rows);
                merged
            })
            .unwrap_or_default()
    }
}
