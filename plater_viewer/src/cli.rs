use std::path::PathBuf;

use clap::Parser;
use plater_scene::{Modifiers, ReconcileOptions};
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(
    about = "Headless plate mirror: reconciles a scene file onto wgpu buffers and runs pick passes",
    version
)]
pub struct Args {
    /// Scene JSON describing objects, volumes, instances, plates and finished steps
    #[arg(long)]
    pub scene: PathBuf,

    /// Optional second scene reconciled on top of the first (edit simulation)
    #[arg(long)]
    pub next_scene: Option<PathBuf>,

    /// Optional mirror config JSON (drag threshold, selection mode, plate count)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pick target width in pixels
    #[arg(long, default_value_t = 640)]
    pub width: u32,

    /// Pick target height in pixels
    #[arg(long, default_value_t = 480)]
    pub height: u32,

    /// Point pick followed by a click, as X,Y
    #[arg(long, value_parser = parse_point)]
    pub point: Option<[u32; 2]>,

    /// Rectangle pick followed by a release, as X0,Y0,X1,Y1
    #[arg(long, value_parser = parse_rect)]
    pub rect: Option<[u32; 4]>,

    #[arg(long)]
    pub ctrl: bool,

    #[arg(long)]
    pub shift: bool,

    #[arg(long)]
    pub alt: bool,

    /// Mirror only physical model parts (no modifiers, no step artifacts)
    #[arg(long)]
    pub model_parts_only: bool,

    /// Release and recreate every proxy on the last reconcile pass
    #[arg(long)]
    pub full_refresh: bool,

    /// Cap on bytes of live mesh buffers; exceeding it marks proxies non-renderable
    #[arg(long)]
    pub buffer_budget: Option<u64>,

    /// When set, write the full pick target to disk (PNG)
    #[arg(long)]
    pub dump_pick: Option<PathBuf>,
}

impl Args {
    pub fn modifiers(&self) -> Modifiers {
        Modifiers {
            ctrl: self.ctrl,
            shift: self.shift,
            alt: self.alt,
        }
    }

    pub fn reconcile_options(&self, last_pass: bool) -> ReconcileOptions {
        ReconcileOptions {
            force_full_refresh: self.full_refresh && last_pass,
            model_parts_only: self.model_parts_only,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinateError {
    #[error("expected {expected} comma-separated values, got {found}")]
    Count { expected: usize, found: usize },
    #[error("invalid pixel coordinate '{0}'")]
    Invalid(String),
}

fn parse_coordinates<const N: usize>(value: &str) -> Result<[u32; N], CoordinateError> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(CoordinateError::Count {
            expected: N,
            found: parts.len(),
        });
    }
    let mut coords = [0u32; N];
    for (slot, part) in coords.iter_mut().zip(parts) {
        *slot = part
            .parse()
            .map_err(|_| CoordinateError::Invalid(part.to_string()))?;
    }
    Ok(coords)
}

pub fn parse_point(value: &str) -> Result<[u32; 2], CoordinateError> {
    parse_coordinates(value)
}

pub fn parse_rect(value: &str) -> Result<[u32; 4], CoordinateError> {
    parse_coordinates(value)
}
