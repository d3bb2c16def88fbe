use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use log::{debug, warn};
use wgpu::util::DeviceExt;

use super::{BufferId, DrawBackend, TextureBackend, TextureId, quad_indices};
use crate::batcher::{MAX_TEXTURE_UNITS, MosaicVertex};
use crate::error::BackendError;
use crate::pixel::PixelFormat;
use crate::rect::Rect;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct ViewportUniform {
    scale: [f32; 2],
    translate: [f32; 2],
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: PixelFormat,
    width: u32,
    height: u32,
}

/// Render target for the frame in progress.
pub struct GpuFrameTarget {
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8888 => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Bgra8888 => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Gray8 => wgpu::TextureFormat::R8Unorm,
    }
}

/// wgpu implementation of the backend traits.
///
/// Every `draw` records and submits its own render pass, so texture swaps
/// between draws (low-resource mode) are ordered correctly by the queue.
/// The first pass of a frame clears the target.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    pipeline: wgpu::RenderPipeline,
    texture_bgl: wgpu::BindGroupLayout,
    viewport_bg: wgpu::BindGroup,
    viewport_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    dummy: GpuTexture,
    index_buffer: wgpu::Buffer,
    index_slots: u32,
    textures: HashMap<u32, GpuTexture>,
    buffers: HashMap<u32, wgpu::Buffer>,
    units: Vec<Option<TextureId>>,
    next_id: u32,
    target: Option<GpuFrameTarget>,
    cleared: bool,
    clear_color: wgpu::Color,
}

impl WgpuBackend {
    /// `max_slots` bounds the quads a single draw may cover.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        target_format: wgpu::TextureFormat,
        max_slots: u32,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mosaic-shader"),
            source: wgpu::ShaderSource::Wgsl(mosaic_shaders::MOSAIC_WGSL.into()),
        });

        let viewport_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mosaic-vp-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: std::num::NonZeroU64::new(16),
                },
                count: None,
            }],
        });

        let mut texture_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..MAX_TEXTURE_UNITS as u32)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        texture_entries.push(wgpu::BindGroupLayoutEntry {
            binding: mosaic_shaders::MOSAIC_SAMPLER_BINDING,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mosaic-texture-bgl"),
            entries: &texture_entries,
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mosaic-pipeline-layout"),
            bind_group_layouts: &[&viewport_bgl, &texture_bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("mosaic-pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<MosaicVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            offset: 0,
                            shader_location: 0,
                            format: wgpu::VertexFormat::Float32x2,
                        },
                        wgpu::VertexAttribute {
                            offset: 8,
                            shader_location: 1,
                            format: wgpu::VertexFormat::Float32x2,
                        },
                        wgpu::VertexAttribute {
                            offset: 16,
                            shader_location: 2,
                            format: wgpu::VertexFormat::Unorm8x4,
                        },
                        wgpu::VertexAttribute {
                            offset: 20,
                            shader_location: 3,
                            format: wgpu::VertexFormat::Sint32,
                        },
                    ],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: target_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        let viewport_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mosaic-vp"),
            contents: bytemuck::bytes_of(&ViewportUniform::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let viewport_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mosaic-vp-bg"),
            layout: &viewport_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: viewport_buffer.as_entire_binding(),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("mosaic-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let dummy = Self::allocate(&device, 1, 1, PixelFormat::Rgba8888, "mosaic-dummy");
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &dummy.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255, 255, 255, 255],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mosaic-indices"),
            contents: bytemuck::cast_slice(&quad_indices(max_slots)),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            device,
            queue,
            pipeline,
            texture_bgl,
            viewport_bg,
            viewport_buffer,
            sampler,
            dummy,
            index_buffer,
            index_slots: max_slots,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            units: vec![None; MAX_TEXTURE_UNITS],
            next_id: 1,
            target: None,
            cleared: false,
            clear_color: wgpu::Color::WHITE,
        }
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = wgpu::Color {
            r: color[0] as f64,
            g: color[1] as f64,
            b: color[2] as f64,
            a: color[3] as f64,
        };
    }

    /// Target of the next frame. Must be set before `begin_frame`.
    pub fn set_target(&mut self, target: GpuFrameTarget) {
        self.target = Some(target);
    }

    pub fn device(&self) -> Arc<wgpu::Device> {
        self.device.clone()
    }

    pub fn queue(&self) -> Arc<wgpu::Queue> {
        self.queue.clone()
    }

    fn allocate(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: PixelFormat,
        label: &str,
    ) -> GpuTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            format,
            width,
            height,
        }
    }

    fn texture(&self, texture: TextureId, region: Rect) -> Result<&GpuTexture, BackendError> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture.0))?;
        if region.right() > tex.width || region.bottom() > tex.height {
            return Err(BackendError::OutOfBounds(format!(
                "{region:?} outside {}x{} texture",
                tex.width, tex.height
            )));
        }
        Ok(tex)
    }

    fn texture_bind_group(&self) -> wgpu::BindGroup {
        let views: Vec<&wgpu::TextureView> = self
            .units
            .iter()
            .map(|unit| {
                unit.and_then(|id| self.textures.get(&id.0))
                    .map_or(&self.dummy.view, |t| &t.view)
            })
            .collect();
        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: mosaic_shaders::MOSAIC_SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mosaic-texture-bg"),
            layout: &self.texture_bgl,
            entries: &entries,
        })
    }

    fn load_op(&mut self) -> wgpu::LoadOp<wgpu::Color> {
        if self.cleared {
            wgpu::LoadOp::Load
        } else {
            self.cleared = true;
            wgpu::LoadOp::Clear(self.clear_color)
        }
    }
}

impl TextureBackend for WgpuBackend {
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<TextureId, BackendError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if width > max || height > max {
            return Err(BackendError::Device(format!(
                "{width}x{height} exceeds the device limit of {max}"
            )));
        }
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let tex = Self::allocate(&self.device, width, height, format, "mosaic-atlas");
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            warn!("texture allocation failed: {err}");
            return Err(BackendError::OutOfMemory);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.textures.insert(id, tex);
        debug!("wgpu texture {id} ({width}x{height} {format:?})");
        Ok(TextureId(id))
    }

    fn destroy_texture(&mut self, texture: TextureId) -> Result<(), BackendError> {
        let tex = self
            .textures
            .remove(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture.0))?;
        tex.texture.destroy();
        for unit in self.units.iter_mut() {
            if *unit == Some(texture) {
                *unit = None;
            }
        }
        Ok(())
    }

    fn upload_sub_region(
        &mut self,
        texture: TextureId,
        region: Rect,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let tex = self.texture(texture, region)?;
        let bpp = tex.format.bytes_per_pixel() as u32;
        if data.len() != tex.format.buffer_len(region.width, region.height) {
            return Err(BackendError::OutOfBounds(format!(
                "{} bytes for {region:?}",
                data.len()
            )));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(region.width * bpp),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_sub_region(
        &mut self,
        texture: TextureId,
        region: Rect,
    ) -> Result<Vec<u8>, BackendError> {
        let tex = self.texture(texture, region)?;
        let bpp = tex.format.bytes_per_pixel() as u32;
        // Buffer copies need 256-byte aligned rows.
        let row = region.width * bpp;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = row.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mosaic-readback"),
            size: padded_row as u64 * region.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mosaic-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(region.height),
                },
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| BackendError::Device(format!("readback channel closed: {e}")))?
            .map_err(|e| BackendError::Device(format!("readback map failed: {e}")))?;

        let mut out = Vec::with_capacity((row * region.height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for y in 0..region.height as usize {
                let start = y * padded_row as usize;
                out.extend_from_slice(&mapped[start..start + row as usize]);
            }
        }
        staging.unmap();
        Ok(out)
    }

    fn bind_to_unit(&mut self, texture: TextureId, unit: u32) -> Result<(), BackendError> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::UnknownTexture(texture.0));
        }
        let slot = self
            .units
            .get_mut(unit as usize)
            .ok_or_else(|| BackendError::OutOfBounds(format!("texture unit {unit}")))?;
        *slot = Some(texture);
        Ok(())
    }

    fn max_texture_units(&self) -> u32 {
        MAX_TEXTURE_UNITS as u32
    }
}

impl DrawBackend for WgpuBackend {
    fn create_buffer(&mut self, size: u64) -> Result<BufferId, BackendError> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mosaic-vertices"),
            size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(id, buffer);
        Ok(BufferId(id))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let buf = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::UnknownBuffer(buffer.0))?;
        if offset + data.len() as u64 > buf.size() {
            return Err(BackendError::OutOfBounds(format!(
                "write of {} bytes at {offset} into {} byte buffer",
                data.len(),
                buf.size()
            )));
        }
        self.queue.write_buffer(buf, offset, data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) -> Result<(), BackendError> {
        let buf = self
            .buffers
            .remove(&buffer.0)
            .ok_or(BackendError::UnknownBuffer(buffer.0))?;
        buf.destroy();
        Ok(())
    }

    fn begin_frame(&mut self) -> Result<(), BackendError> {
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| BackendError::Device("no frame target set".into()))?;
        let vp = ViewportUniform {
            scale: [2.0 / target.width.max(1) as f32, -2.0 / target.height.max(1) as f32],
            translate: [-1.0, 1.0],
        };
        self.queue
            .write_buffer(&self.viewport_buffer, 0, bytemuck::bytes_of(&vp));
        self.cleared = false;
        Ok(())
    }

    fn draw(&mut self, buffer: BufferId, slots: Range<u32>) -> Result<(), BackendError> {
        if slots.end > self.index_slots {
            return Err(BackendError::OutOfBounds(format!(
                "slots {slots:?} beyond index capacity {}",
                self.index_slots
            )));
        }
        let load = self.load_op();
        let bind_group = self.texture_bind_group();
        let vertices = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::UnknownBuffer(buffer.0))?;
        let target = self
            .target
            .as_ref()
            .ok_or_else(|| BackendError::Device("draw outside of a frame".into()))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mosaic-draw-encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mosaic-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.viewport_bg, &[]);
            pass.set_bind_group(1, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertices.slice(..));
            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(slots.start * 6..slots.end * 6, 0, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), BackendError> {
        // A frame without draws still clears its target.
        if !self.cleared {
            let load = self.load_op();
            if let Some(target) = self.target.as_ref() {
                let mut encoder = self
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("mosaic-clear-encoder"),
                    });
                {
                    let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("mosaic-clear"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &target.view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load,
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                }
                self.queue.submit(Some(encoder.finish()));
            }
        }
        self.target = None;
        Ok(())
    }
}
