//! [`GraphicsDevice`] backed by wgpu.
//!
//! Only compiled with the `wgpu` feature. Shader modules are registered as
//! WGSL source by name; pipelines use an automatically derived layout, so
//! bind groups are built from `pipeline.get_bind_group_layout(n)` together
//! with the entries collected by [`WgpuBindings`].

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use wgpu::util::DeviceExt;

use crate::device::{
    AddressMode, BindEncoder, BufferDesc, CompareFunction, DepthSettings, FilterMode,
    GraphicsDevice, PixelFormat, SamplerDesc, TextureDesc,
};
use crate::error::DeviceError;
use crate::layout::VertexFormat;
use crate::pipeline::{BlendMode, PipelineKey, Topology};
use crate::resource::{BindGroup, BufferRole};

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        PixelFormat::R32Float => wgpu::TextureFormat::R32Float,
        PixelFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        PixelFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32 => wgpu::VertexFormat::Float32,
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Sint32 => wgpu::VertexFormat::Sint32,
        VertexFormat::Sint32x2 => wgpu::VertexFormat::Sint32x2,
        VertexFormat::Sint32x3 => wgpu::VertexFormat::Sint32x3,
        VertexFormat::Sint32x4 => wgpu::VertexFormat::Sint32x4,
        VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
        VertexFormat::Uint32x2 => wgpu::VertexFormat::Uint32x2,
        VertexFormat::Uint32x3 => wgpu::VertexFormat::Uint32x3,
        VertexFormat::Uint32x4 => wgpu::VertexFormat::Uint32x4,
        VertexFormat::Float16x2 => wgpu::VertexFormat::Float16x2,
        VertexFormat::Float16x4 => wgpu::VertexFormat::Float16x4,
        VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
    }
}

fn compare_function(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn blend_state(blend: BlendMode) -> wgpu::BlendState {
    match blend {
        BlendMode::Opaque => wgpu::BlendState::REPLACE,
        BlendMode::AlphaBlend => wgpu::BlendState::ALPHA_BLENDING,
        BlendMode::PremultipliedAlpha => wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING,
        BlendMode::Additive => {
            let add = wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            };
            wgpu::BlendState { color: add, alpha: add }
        }
    }
}

fn topology(topology: Topology) -> wgpu::PrimitiveTopology {
    match topology {
        Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        Topology::LineList => wgpu::PrimitiveTopology::LineList,
        Topology::PointList => wgpu::PrimitiveTopology::PointList,
    }
}

fn buffer_usage(role: BufferRole) -> wgpu::BufferUsages {
    let base = match role {
        BufferRole::Vertex => wgpu::BufferUsages::VERTEX,
        BufferRole::Index => wgpu::BufferUsages::INDEX,
        BufferRole::Uniform | BufferRole::Material => wgpu::BufferUsages::UNIFORM,
        BufferRole::Custom => wgpu::BufferUsages::STORAGE,
    };
    base | wgpu::BufferUsages::COPY_DST
}

fn address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

/// Whether WGSL `source` declares a function named `entry`.
fn declares_entry_point(source: &str, entry: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    source.match_indices("fn").any(|(at, _)| {
        let before_ok = source[..at].chars().next_back().map_or(true, |c| !is_ident(c));
        let rest = &source[at + 2..];
        let spaced = rest.starts_with(char::is_whitespace);
        before_ok
            && spaced
            && rest
                .trim_start()
                .strip_prefix(entry)
                .is_some_and(|after| after.trim_start().starts_with('('))
    })
}

// ---------------------------------------------------------------------------
// Device objects
// ---------------------------------------------------------------------------

pub struct WgpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// Depth test settings; combined with an attachment format at use.
#[derive(Debug, Clone, Copy)]
pub struct WgpuDepthState {
    pub compare: wgpu::CompareFunction,
    pub write_enabled: bool,
}

impl WgpuDepthState {
    pub fn to_state(self, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: self.write_enabled,
            depth_compare: self.compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

struct ShaderEntry {
    module: wgpu::ShaderModule,
    source: String,
}

// ---------------------------------------------------------------------------
// WgpuDevice
// ---------------------------------------------------------------------------

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    shaders: Mutex<HashMap<String, ShaderEntry>>,
}

impl WgpuDevice {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            shaders: Mutex::new(HashMap::new()),
        }
    }

    /// Open the first available adapter without a surface.
    pub fn request() -> anyhow::Result<Self> {
        pollster::block_on(async {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends: wgpu::Backends::all(),
                ..Default::default()
            });
            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::LowPower,
                    compatible_surface: None,
                    force_fallback_adapter: false,
                })
                .await
                .ok_or_else(|| anyhow::anyhow!("no suitable GPU adapter found"))?;
            let (device, queue) = adapter
                .request_device(
                    &wgpu::DeviceDescriptor {
                        label: Some("poser_device"),
                        required_features: wgpu::Features::empty(),
                        required_limits: wgpu::Limits::default(),
                        memory_hints: wgpu::MemoryHints::default(),
                    },
                    None,
                )
                .await?;
            Ok(Self::new(device, queue))
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Compile and register a WGSL module under `name`.
    pub fn register_shader(&self, name: &str, wgsl: &str) -> Result<(), DeviceError> {
        let module = self.scoped(|device| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(wgsl.into()),
            })
        })?;
        self.shaders.lock().unwrap_or_else(PoisonError::into_inner).insert(
            name.to_owned(),
            ShaderEntry {
                module,
                source: wgsl.to_owned(),
            },
        );
        Ok(())
    }

    /// Run `f` inside a validation error scope.
    fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(DeviceError::Backend(err.to_string())),
            None => Ok(value),
        }
    }
}

impl GraphicsDevice for WgpuDevice {
    type Buffer = wgpu::Buffer;
    type Texture = WgpuTexture;
    type Pipeline = wgpu::RenderPipeline;
    type DepthState = WgpuDepthState;
    type Sampler = wgpu::Sampler;

    fn create_buffer(
        &self,
        desc: &BufferDesc<'_>,
        contents: Option<&[u8]>,
    ) -> Result<wgpu::Buffer, DeviceError> {
        let max = self.device.limits().max_buffer_size;
        if desc.size > max {
            return Err(DeviceError::OutOfMemory {
                requested: desc.size,
                available: max,
            });
        }
        let usage = buffer_usage(desc.role);
        self.scoped(|device| match contents {
            Some(bytes) => device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(desc.label),
                contents: bytes,
                usage,
            }),
            None => device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(desc.label),
                size: desc.size,
                usage,
                mapped_at_creation: false,
            }),
        })
    }

    fn write_buffer(&self, buffer: &wgpu::Buffer, offset: u64, bytes: &[u8]) {
        self.queue.write_buffer(buffer, offset, bytes);
    }

    fn create_texture(
        &self,
        label: &str,
        desc: &TextureDesc,
        contents: Option<&[u8]>,
    ) -> Result<WgpuTexture, DeviceError> {
        if let Some(data) = contents {
            if data.len() as u64 != desc.byte_size() {
                return Err(DeviceError::InvalidTextureData {
                    expected: desc.byte_size(),
                    actual: data.len() as u64,
                });
            }
        }
        let format = texture_format(desc.format);
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if desc.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = self.scoped(|device| {
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage,
                view_formats: &[],
            })
        })?;
        if let Some(data) = contents {
            self.queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                    rows_per_image: Some(desc.height),
                },
                size,
            );
        }
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(WgpuTexture { texture, view })
    }

    fn create_pipeline(&self, key: &PipelineKey) -> Result<wgpu::RenderPipeline, DeviceError> {
        let shaders = self.shaders.lock().unwrap_or_else(PoisonError::into_inner);
        let shader = shaders
            .get(&key.shader.module)
            .ok_or_else(|| DeviceError::MissingShaderModule {
                module: key.shader.module.clone(),
            })?;
        let entries =
            std::iter::once(&key.shader.vertex_entry).chain(key.shader.fragment_entry.as_ref());
        for entry in entries {
            if !declares_entry_point(&shader.source, entry) {
                return Err(DeviceError::MissingEntryPoint {
                    module: key.shader.module.clone(),
                    entry: entry.clone(),
                });
            }
        }
        if key.color_format.is_depth() {
            return Err(DeviceError::InvalidFormat {
                format: key.color_format,
                usage: "a color target",
            });
        }
        if let Some(format) = key.depth_format.filter(|f| !f.is_depth()) {
            return Err(DeviceError::InvalidFormat {
                format,
                usage: "a depth target",
            });
        }

        let attributes: Vec<wgpu::VertexAttribute> = key
            .vertex_layout
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: vertex_format(a.format),
                offset: a.offset as wgpu::BufferAddress,
                shader_location: a.location,
            })
            .collect();
        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: key.vertex_layout.stride as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];
        let buffers: &[wgpu::VertexBufferLayout<'_>] = if attributes.is_empty() {
            &[]
        } else {
            &vertex_buffers
        };

        let targets = [Some(wgpu::ColorTargetState {
            format: texture_format(key.color_format),
            blend: Some(blend_state(key.blend)),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let depth_stencil = key.depth_format.map(|format| {
            WgpuDepthState {
                compare: compare_function(key.depth.compare),
                write_enabled: key.depth.write_enabled,
            }
            .to_state(texture_format(format))
        });

        self.scoped(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(key.label.as_str()),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &shader.module,
                    entry_point: Some(key.shader.vertex_entry.as_str()),
                    buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: key.shader.fragment_entry.as_deref().map(|entry| wgpu::FragmentState {
                    module: &shader.module,
                    entry_point: Some(entry),
                    targets: &targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: topology(key.topology),
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil,
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
                cache: None,
            })
        })
    }

    fn create_depth_state(
        &self,
        _label: &str,
        settings: &DepthSettings,
    ) -> Result<WgpuDepthState, DeviceError> {
        Ok(WgpuDepthState {
            compare: compare_function(settings.compare),
            write_enabled: settings.write_enabled,
        })
    }

    fn create_sampler(
        &self,
        label: &str,
        desc: &SamplerDesc,
    ) -> Result<wgpu::Sampler, DeviceError> {
        let address = address_mode(desc.address);
        let filter = filter_mode(desc.filter);
        self.scoped(|device| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address,
                address_mode_v: address,
                address_mode_w: address,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        })
    }
}

// ---------------------------------------------------------------------------
// WgpuBindings
// ---------------------------------------------------------------------------

/// Collects bind calls so they can be applied to a render pass and a bind
/// group.
#[derive(Default)]
pub struct WgpuBindings<'r> {
    vertex_buffers: Vec<(u32, &'r wgpu::Buffer)>,
    buffers: Vec<(u32, &'r wgpu::Buffer)>,
    textures: Vec<(u32, &'r wgpu::TextureView)>,
}

impl<'r> WgpuBindings<'r> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set every collected vertex buffer on `pass`.
    pub fn set_vertex_buffers(&self, pass: &mut wgpu::RenderPass<'_>) {
        for &(slot, buffer) in &self.vertex_buffers {
            pass.set_vertex_buffer(slot, buffer.slice(..));
        }
    }

    /// Bind group entries for the non-vertex resources, by binding slot.
    pub fn entries(&self) -> Vec<wgpu::BindGroupEntry<'r>> {
        let buffers = self.buffers.iter().map(|&(binding, buffer)| wgpu::BindGroupEntry {
            binding,
            resource: buffer.as_entire_binding(),
        });
        let textures = self.textures.iter().map(|&(binding, view)| wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(view),
        });
        buffers.chain(textures).collect()
    }

    /// Build a bind group against `layout` (typically
    /// `pipeline.get_bind_group_layout(0)`).
    pub fn create_bind_group(
        &self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("poser_bindings"),
            layout,
            entries: &self.entries(),
        })
    }
}

impl<'r> BindEncoder<'r, WgpuDevice> for WgpuBindings<'r> {
    fn bind_buffer(&mut self, group: BindGroup, slot: u32, buffer: &'r wgpu::Buffer) {
        match group {
            BindGroup::Vertex => self.vertex_buffers.push((slot, buffer)),
            _ => self.buffers.push((slot, buffer)),
        }
    }

    fn bind_texture(&mut self, slot: u32, texture: &'r WgpuTexture) {
        self.textures.push((slot, &texture.view));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHADER: &str = r#"
        @vertex
        fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
            return vec4<f32>(position, 1.0);
        }

        @fragment fn fs_main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }

        fn helper_fn_main () {}
    "#;

    #[test]
    fn finds_declared_entry_points() {
        assert!(declares_entry_point(SHADER, "vs_main"));
        assert!(declares_entry_point(SHADER, "fs_main"));
        assert!(declares_entry_point(SHADER, "helper_fn_main"));
    }

    #[test]
    fn rejects_prefixes_and_missing_names() {
        assert!(!declares_entry_point(SHADER, "vs"));
        assert!(!declares_entry_point(SHADER, "fn_main"));
        assert!(!declares_entry_point(SHADER, "cs_main"));
    }

    #[test]
    fn buffer_roles_allow_updates() {
        for role in [
            BufferRole::Vertex,
            BufferRole::Index,
            BufferRole::Uniform,
            BufferRole::Custom,
        ] {
            assert!(buffer_usage(role).contains(wgpu::BufferUsages::COPY_DST));
        }
        assert!(buffer_usage(BufferRole::Material).contains(wgpu::BufferUsages::UNIFORM));
    }
}
