//! Offscreen flat-color pass used to resolve pixels to proxies.

use std::{borrow::Cow, num::NonZeroU64, sync::mpsc};

use anyhow::{Result, ensure};
use glam::Mat4;
use plater_scene::picking::codec;
use plater_scene::{PickDraw, PickRegion, PickSurface, PickSurfaceError, PixelBlock};
use pollster::FutureExt;
use wgpu::{COPY_BYTES_PER_ROW_ALIGNMENT, Maintain};

use crate::gpu::{GpuContext, GpuMesh};
use crate::shaders::{PICK_SHADER_SOURCE, PickUniforms};

const PICK_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const PICK_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const UNIFORM_SIZE: u64 = std::mem::size_of::<PickUniforms>() as u64;

pub struct WgpuPickSurface<'a> {
    context: &'a GpuContext,
    width: u32,
    height: u32,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_stride: u64,
    uniform_capacity: usize,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
}

impl<'a> WgpuPickSurface<'a> {
    pub fn new(context: &'a GpuContext, width: u32, height: u32) -> Result<Self> {
        let device = &context.device;
        let max_side = device.limits().max_texture_dimension_2d;
        ensure!(
            width > 0 && height > 0 && width <= max_side && height <= max_side,
            "pick target {width}x{height} must be within 1..={max_side} on each side"
        );

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("pick-shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(PICK_SHADER_SOURCE)),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("pick-bind-group-layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(UNIFORM_SIZE),
                },
                count: None,
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("pick-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &wgpu::vertex_attr_array![0 => Float32x3],
        };

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("pick-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "pick_vs_main",
                buffers: &[vertex_layout],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "pick_fs_main",
                // Ids must reach the target untouched: no blending.
                targets: &[Some(wgpu::ColorTargetState {
                    format: PICK_COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: None,
                ..wgpu::PrimitiveState::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: PICK_DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let uniform_stride = UNIFORM_SIZE.div_ceil(alignment) * alignment;
        let uniform_capacity = 64;
        let (uniform_buffer, bind_group) =
            create_uniforms(device, &bind_group_layout, uniform_stride, uniform_capacity);

        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pick-color-target"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PICK_COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("pick-depth-target"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: PICK_DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            context,
            width,
            height,
            pipeline,
            bind_group_layout,
            uniform_stride,
            uniform_capacity,
            uniform_buffer,
            bind_group,
            color_texture,
            color_view,
            depth_view,
        })
    }

    pub fn full_region(&self) -> PickRegion {
        PickRegion {
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
        }
    }

    fn ensure_uniform_capacity(&mut self, draws: usize) {
        if draws <= self.uniform_capacity {
            return;
        }
        let capacity = draws.next_power_of_two();
        let (buffer, bind_group) = create_uniforms(
            &self.context.device,
            &self.bind_group_layout,
            self.uniform_stride,
            capacity,
        );
        self.uniform_buffer = buffer;
        self.bind_group = bind_group;
        self.uniform_capacity = capacity;
    }

    fn write_uniforms(&self, draws: &[PickDraw<'_, GpuMesh>], view_projection: Mat4) {
        if draws.is_empty() {
            return;
        }
        let stride = self.uniform_stride as usize;
        let mut bytes = vec![0u8; stride * draws.len()];
        for (slot, draw) in draws.iter().enumerate() {
            let uniforms = PickUniforms {
                model_view_projection: (view_projection * draw.world).to_cols_array_2d(),
                color: codec::to_unorm(draw.color),
            };
            let start = slot * stride;
            bytes[start..start + UNIFORM_SIZE as usize]
                .copy_from_slice(bytemuck::bytes_of(&uniforms));
        }
        self.context
            .queue
            .write_buffer(&self.uniform_buffer, 0, &bytes);
    }

    fn read_region(
        &self,
        mut encoder: wgpu::CommandEncoder,
        region: PickRegion,
    ) -> Result<Vec<u8>, PickSurfaceError> {
        let device = &self.context.device;
        let bytes_per_row = 4 * region.width;
        let padded_bytes_per_row = bytes_per_row.div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT)
            * COPY_BYTES_PER_ROW_ALIGNMENT;
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pick-readback"),
            size: padded_bytes_per_row as u64 * region.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.color_texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(region.height),
                },
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );

        self.context.queue.submit(std::iter::once(encoder.finish()));
        device.poll(Maintain::Wait);

        let buffer_slice = readback_buffer.slice(..);
        let (tx, rx) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(Maintain::Wait);
        rx.recv()
            .map_err(|err| PickSurfaceError::Readback(format!("waiting for readback: {err}")))?
            .map_err(|err| PickSurfaceError::Readback(format!("mapping readback buffer: {err}")))?;

        let padded = buffer_slice.get_mapped_range();
        let mut rgba = vec![0u8; region.pixel_count() * 4];
        for row in 0..region.height as usize {
            let src_offset = row * padded_bytes_per_row as usize;
            let dst_offset = row * bytes_per_row as usize;
            rgba[dst_offset..dst_offset + bytes_per_row as usize]
                .copy_from_slice(&padded[src_offset..src_offset + bytes_per_row as usize]);
        }
        drop(padded);
        readback_buffer.unmap();
        Ok(rgba)
    }
}

impl PickSurface<GpuMesh> for WgpuPickSurface<'_> {
    fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render_pick_pass(
        &mut self,
        draws: &[PickDraw<'_, GpuMesh>],
        view_projection: Mat4,
        region: PickRegion,
    ) -> Result<PixelBlock, PickSurfaceError> {
        if region.clamp_to(self.width, self.height) != Some(region) {
            return Err(PickSurfaceError::RegionOutOfBounds {
                region,
                width: self.width,
                height: self.height,
            });
        }
        self.ensure_uniform_capacity(draws.len());
        self.write_uniforms(draws, view_projection);

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("pick-encoder"),
        });
        {
            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("pick-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            rpass.set_pipeline(&self.pipeline);
            for (slot, draw) in draws.iter().enumerate() {
                let offset = (slot as u64 * self.uniform_stride) as u32;
                rpass.set_bind_group(0, &self.bind_group, &[offset]);
                rpass.set_vertex_buffer(0, draw.buffer.vertex_buffer.slice(..));
                rpass.set_index_buffer(draw.buffer.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                rpass.draw_indexed(0..draw.buffer.index_count, 0, 0..1);
            }
        }

        let rgba = self.read_region(encoder, region);
        if let Some(err) = device.pop_error_scope().block_on() {
            return Err(PickSurfaceError::Device(err.to_string()));
        }
        let block = PixelBlock {
            region,
            rgba: rgba?,
        };
        log::debug!(
            "[plater_viewer] pick pass: {} draws, region {}x{} at {},{}",
            draws.len(),
            region.width,
            region.height,
            region.x,
            region.y
        );
        Ok(block)
    }
}

fn create_uniforms(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    stride: u64,
    capacity: usize,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("pick-uniforms"),
        size: stride * capacity as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("pick-bind-group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: NonZeroU64::new(UNIFORM_SIZE),
            }),
        }],
    });
    (buffer, bind_group)
}
