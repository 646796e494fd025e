use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use bytemuck::cast_slice;
use plater_scene::{MeshUploader, UploadError, UploadRequest};
use pollster::FutureExt;
use wgpu::{Backends, InstanceDescriptor, InstanceFlags, util::DeviceExt};

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Headless device; falls back to a low-power and then a software adapter.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(InstanceDescriptor {
            backends: Backends::all(),
            flags: InstanceFlags::default(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .block_on()
            .or_else(|| {
                instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::LowPower,
                        force_fallback_adapter: false,
                        compatible_surface: None,
                    })
                    .block_on()
            })
            .or_else(|| {
                instance
                    .request_adapter(&wgpu::RequestAdapterOptions {
                        power_preference: wgpu::PowerPreference::LowPower,
                        force_fallback_adapter: true,
                        compatible_surface: None,
                    })
                    .block_on()
            })
            .context("requesting adapter for pick target")?;
        let adapter_info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("plater-viewer-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                },
                None,
            )
            .block_on()
            .context("requesting device for pick target")?;

        log::info!(
            "[plater_viewer] using adapter {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );
        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }
}

/// Vertex and index buffers of one proxy. Dropping it releases both.
pub struct GpuMesh {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
    bytes: u64,
    live_bytes: Arc<AtomicU64>,
}

impl Drop for GpuMesh {
    fn drop(&mut self) {
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
        self.live_bytes.fetch_sub(self.bytes, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for GpuMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuMesh")
            .field("index_count", &self.index_count)
            .field("bytes", &self.bytes)
            .finish()
    }
}

pub struct WgpuUploader<'a> {
    device: &'a wgpu::Device,
    /// Smaller of the device buffer limit and the user budget.
    limit: u64,
    live_bytes: Arc<AtomicU64>,
}

impl<'a> WgpuUploader<'a> {
    pub fn new(context: &'a GpuContext, budget: Option<u64>) -> Self {
        let device_limit = context.device.limits().max_buffer_size;
        Self {
            device: &context.device,
            limit: budget.map_or(device_limit, |budget| budget.min(device_limit)),
            live_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::Relaxed)
    }
}

impl MeshUploader for WgpuUploader<'_> {
    type Buffer = GpuMesh;

    fn upload(&mut self, request: UploadRequest<'_>) -> Result<GpuMesh, UploadError> {
        let mesh = request.mesh;
        if mesh.is_empty() {
            return Err(UploadError::Backend(format!(
                "mesh for {} has no triangles",
                request.identity
            )));
        }
        let bytes = mesh.byte_len();
        let live = self.live_bytes();
        if live + bytes > self.limit {
            return Err(UploadError::ResourceExhausted {
                requested: bytes,
                limit: self.limit.saturating_sub(live),
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let label = format!("proxy-{}", request.identity);
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&label),
                contents: cast_slice(&mesh.positions),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&label),
                contents: cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        if let Some(err) = self.device.pop_error_scope().block_on() {
            log::warn!("[plater_viewer] device out of memory: {err}");
            return Err(UploadError::ResourceExhausted {
                requested: bytes,
                limit: self.limit.saturating_sub(live),
            });
        }

        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: mesh.indices.len() as u32,
            bytes,
            live_bytes: Arc::clone(&self.live_bytes),
        })
    }
}
