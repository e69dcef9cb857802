//! wgpu-backed presentation surface.
//!
//! The drawable is an offscreen `Rgba8Unorm` render target. Each draw uploads
//! the rasterised image region as a texture and renders it as a textured quad
//! into the destination viewport; `display` submits the frame and, when
//! readback is enabled, copies the drawable back for snapshots.

use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use std::sync::Arc;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

use super::context::ContextId;
use super::error::{PreviewError, Result};
use super::frame_buffer::FrameBuffer;
use super::geometry::Rect;
use super::image::Image;
use super::surface::PresentationSurface;

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
    uv: [f32; 2],
}

impl QuadVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Two triangles covering clip space; uv (0, 0) is the top-left texel.
const QUAD: [QuadVertex; 6] = [
    QuadVertex {
        position: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    QuadVertex {
        position: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    QuadVertex {
        position: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
    QuadVertex {
        position: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
    QuadVertex {
        position: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    QuadVertex {
        position: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
];

/// Uploaded frame texture, reused while the region size is unchanged.
struct FrameTexture {
    texture: wgpu::Texture,
    width: u32,
    height: u32,
}

pub struct GpuSurface {
    context: ContextId,
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    quad: wgpu::Buffer,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    width: u32,
    height: u32,
    frame_texture: Option<FrameTexture>,
    encoder: Option<wgpu::CommandEncoder>,
    readback: bool,
    presented: Arc<FrameBuffer>,
    adapter_name: String,
}

impl GpuSurface {
    /// Create a surface with a `width`x`height` drawable.
    ///
    /// Fails when no GPU adapter is available.
    pub fn new(width: u32, height: u32, readback: bool) -> Result<Self> {
        pollster::block_on(Self::create(width, height, readback))
    }

    async fn create(width: u32, height: u32, readback: bool) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PreviewError::EmptyRegion { width, height });
        }

        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::LowPower,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| PreviewError::Gpu(format!("no suitable GPU adapter: {e}")))?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            width,
            height,
            "GPU adapter selected for preview surface"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("preview device"),
                ..Default::default()
            })
            .await
            .map_err(|e| PreviewError::Gpu(format!("failed to create GPU device: {e}")))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("preview blit shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blit.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("preview bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("preview pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            ..Default::default()
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("preview pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[QuadVertex::layout()],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview_mask: None,
            cache: None,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("preview sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let quad = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("preview quad"),
            contents: bytemuck::cast_slice(&QUAD),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let target = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("preview drawable"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Self {
            context: ContextId::next(),
            device,
            queue,
            pipeline,
            bind_group_layout,
            sampler,
            quad,
            target,
            target_view,
            width,
            height,
            frame_texture: None,
            encoder: None,
            readback,
            presented: Arc::new(FrameBuffer::new(3)),
            adapter_name: adapter_info.name,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Frames presented by this surface. Pixels are only kept when readback
    /// is enabled.
    pub fn presented(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.presented)
    }

    /// Upload `pixels` into the frame texture, reallocating on size change.
    fn upload(&mut self, pixels: &RgbaImage) -> wgpu::TextureView {
        let (width, height) = pixels.dimensions();
        let frame = match self.frame_texture.take() {
            Some(frame) if frame.width == width && frame.height == height => frame,
            _ => {
                debug!(width, height, "allocating preview frame texture");
                let texture = self.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some("preview frame texture"),
                    size: wgpu::Extent3d {
                        width,
                        height,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: TARGET_FORMAT,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                });
                FrameTexture {
                    texture,
                    width,
                    height,
                }
            }
        };

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &frame.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.frame_texture = Some(frame);
        view
    }

    /// Record a copy of the drawable into a mappable staging buffer.
    fn copy_to_staging(&self, encoder: &mut wgpu::CommandEncoder) -> (wgpu::Buffer, u32) {
        let padded_bytes_per_row = (self.width * 4).next_multiple_of(256);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("preview readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(self.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        (staging, padded_bytes_per_row)
    }

    /// Map the staging buffer and strip row padding.
    fn read_staging(&self, staging: &wgpu::Buffer, padded_bytes_per_row: u32) -> Result<RgbaImage> {
        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());

        receiver
            .recv()
            .map_err(|_| PreviewError::Gpu("buffer mapping callback dropped".to_string()))?
            .map_err(|e| PreviewError::Gpu(format!("failed to map readback buffer: {e:?}")))?;

        let row_bytes = (self.width * 4) as usize;
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        {
            let data = slice.get_mapped_range();
            for row in data.chunks_exact(padded_bytes_per_row as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }
        staging.unmap();

        RgbaImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| PreviewError::Gpu("readback size mismatch".to_string()))
    }
}

impl PresentationSurface for GpuSurface {
    fn context(&self) -> ContextId {
        self.context
    }

    fn drawable_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn bind_drawable(&mut self) -> Result<()> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("preview frame encoder"),
            });
        {
            let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("preview clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });
        }
        self.encoder = Some(encoder);
        Ok(())
    }

    fn draw_image(&mut self, image: &Image<'_>, dest: Rect, source: Rect) -> Result<()> {
        if self.encoder.is_none() {
            return Err(PreviewError::DrawableNotBound);
        }
        // Viewports address whole pixels; sub-pixel overhang from a
        // fractional display scale rounds onto the drawable edge.
        let dest = dest.snapped();
        let (width, height) = dest.pixel_size();
        if width == 0 || height == 0 {
            return Err(PreviewError::EmptyRegion { width, height });
        }

        // Viewports are y-down from the top-left corner.
        let viewport_x = dest.x;
        let viewport_y = f64::from(self.height) - dest.max_y();
        let fits = viewport_x >= 0.0
            && viewport_y >= 0.0
            && dest.max_x() <= f64::from(self.width)
            && dest.max_y() <= f64::from(self.height);
        if !fits {
            return Err(PreviewError::Gpu(format!(
                "draw rect {dest:?} outside {}x{} drawable",
                self.width, self.height
            )));
        }

        let rendered = image.render_rgba(source)?;
        let frame_view = self.upload(&rendered);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("preview bind group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&frame_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let Some(encoder) = self.encoder.as_mut() else {
            return Err(PreviewError::DrawableNotBound);
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("preview draw pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.target_view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        pass.set_viewport(
            viewport_x as f32,
            viewport_y as f32,
            dest.width as f32,
            dest.height as f32,
            0.0,
            1.0,
        );
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, self.quad.slice(..));
        pass.draw(0..QUAD.len() as u32, 0..1);
        Ok(())
    }

    fn display(&mut self) -> Result<()> {
        let mut encoder = self.encoder.take().ok_or(PreviewError::DrawableNotBound)?;
        let staging = self
            .readback
            .then(|| self.copy_to_staging(&mut encoder));
        self.queue.submit(std::iter::once(encoder.finish()));

        match staging {
            Some((buffer, padded_bytes_per_row)) => {
                let pixels = self.read_staging(&buffer, padded_bytes_per_row)?;
                self.presented.push(pixels);
            }
            None => {
                self.presented.advance();
            }
        }
        Ok(())
    }
}
