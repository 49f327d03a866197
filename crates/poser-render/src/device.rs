//! The graphics device boundary.
//!
//! The resource layer never talks to a GPU API directly. It creates device
//! objects through [`GraphicsDevice`] and attaches them through
//! [`BindEncoder`]. Two implementations ship with the crate:
//! [`HeadlessDevice`](crate::headless::HeadlessDevice), a CPU-side device for
//! tests and tooling, and `WgpuDevice` behind the `wgpu` feature.

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::pipeline::PipelineKey;
use crate::resource::{BindGroup, BufferRole};

/// Offsets and lengths passed to [`GraphicsDevice::write_buffer`] are
/// multiples of this, and buffer sizes are rounded up to it.
pub const WRITE_ALIGNMENT: u64 = 4;

/// `len` zero bytes of host memory, or [`DeviceError::OutOfMemory`] when the
/// allocation cannot be made.
pub(crate) fn zeroed_bytes(len: u64) -> Result<Vec<u8>, DeviceError> {
    let oom = || DeviceError::OutOfMemory {
        requested: len,
        available: 0,
    };
    let len = usize::try_from(len).map_err(|_| oom())?;
    let mut bytes = Vec::new();
    bytes.try_reserve_exact(len).map_err(|_| oom())?;
    bytes.resize(len, 0);
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Texel formats for textures and render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    R32Float,
    Depth32Float,
    Depth24PlusStencil8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::R32Float
            | Self::Depth32Float
            | Self::Depth24PlusStencil8 => 4,
            Self::Rgba16Float => 8,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }
}

/// A buffer to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub role: BufferRole,
    /// Always a multiple of [`WRITE_ALIGNMENT`].
    pub size: u64,
}

/// A 2D texture to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Whether the texture can also be rendered into.
    pub render_target: bool,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            render_target: false,
        }
    }

    /// Bytes of tightly packed texel data for the whole texture, saturating
    /// at `u64::MAX`.
    pub fn byte_size(&self) -> u64 {
        (u64::from(self.width) * u64::from(self.height))
            .saturating_mul(u64::from(self.format.bytes_per_pixel()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    GreaterEqual,
    NotEqual,
    Always,
}

/// Depth test configuration, used both in [`PipelineKey`] and as a
/// standalone depth-state resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepthSettings {
    pub compare: CompareFunction,
    pub write_enabled: bool,
}

impl Default for DepthSettings {
    fn default() -> Self {
        Self {
            compare: CompareFunction::Less,
            write_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub address: AddressMode,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: FilterMode::Linear,
            address: AddressMode::ClampToEdge,
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Creates device objects. Methods take `&self`; implementations are
/// internally synchronized the way `wgpu::Device` is.
pub trait GraphicsDevice {
    type Buffer;
    type Texture;
    type Pipeline;
    type DepthState;
    type Sampler;

    /// Create a buffer of `desc.size` bytes. `contents`, when present, is
    /// exactly `desc.size` bytes long.
    fn create_buffer(
        &self,
        desc: &BufferDesc<'_>,
        contents: Option<&[u8]>,
    ) -> Result<Self::Buffer, DeviceError>;

    /// Overwrite `bytes.len()` bytes at `offset`. Both are multiples of
    /// [`WRITE_ALIGNMENT`] and the range lies inside the buffer.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, bytes: &[u8]);

    fn create_texture(
        &self,
        label: &str,
        desc: &TextureDesc,
        contents: Option<&[u8]>,
    ) -> Result<Self::Texture, DeviceError>;

    fn create_pipeline(&self, key: &PipelineKey) -> Result<Self::Pipeline, DeviceError>;

    fn create_depth_state(
        &self,
        label: &str,
        settings: &DepthSettings,
    ) -> Result<Self::DepthState, DeviceError>;

    fn create_sampler(&self, label: &str, desc: &SamplerDesc) -> Result<Self::Sampler, DeviceError>;
}

/// Receives bind calls from
/// [`ResourceTable::bind_all`](crate::resource::ResourceTable::bind_all).
///
/// `'r` is the lifetime of the borrowed table, so encoders may hold on to
/// the device objects they are given.
pub trait BindEncoder<'r, D: GraphicsDevice> {
    fn bind_buffer(&mut self, group: BindGroup, slot: u32, buffer: &'r D::Buffer);
    fn bind_texture(&mut self, slot: u32, texture: &'r D::Texture);
}
