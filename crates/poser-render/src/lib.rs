//! Poser Render -- GPU resource layer: byte layouts, handle-addressed
//! resources, pipeline caching and deterministic binding.
//!
//! This crate sits on top of [`poser_ecs`]. Component data selected from a
//! [`Registry`](poser_ecs::Registry) is packed into bytes according to a
//! [`ComputedLayout`](layout::ComputedLayout), uploaded into buffers owned by a
//! [`ResourceTable`](resource::ResourceTable), drawn with pipelines from a
//! [`PipelineCache`](pipeline::PipelineCache) and attached to an encoder with
//! [`ResourceTable::bind_all`](resource::ResourceTable::bind_all).
//!
//! All device access goes through the [`GraphicsDevice`](device::GraphicsDevice)
//! trait. [`HeadlessDevice`](headless::HeadlessDevice) is always available;
//! a wgpu-backed device is compiled with the `wgpu` feature.
//!
//! # Quick Start
//!
//! ```
//! use poser_render::prelude::*;
//!
//! let layout = LayoutDescriptor::new()
//!     .with("opacity", ScalarKind::Float)
//!     .with("tint", ScalarKind::Float3)
//!     .plan()
//!     .unwrap();
//! assert_eq!(layout.offset_of("tint"), Some(16));
//! assert_eq!(layout.stride(), 32);
//!
//! let mut block = ParameterBlock::new(&layout);
//! block.set("opacity", 0.5f32).unwrap();
//!
//! let mut ctx = RenderContext::with_device(HeadlessDevice::new());
//! let material = ctx
//!     .resources_mut()
//!     .allocate("material", BufferRole::Material, 32, Some(block.as_bytes()))
//!     .unwrap();
//!
//! let mut encoder = RecordingEncoder::new();
//! ctx.bind_all(&mut encoder);
//! assert_eq!(ctx.resources().bind_plan()[0].handle, material);
//! assert_eq!(ctx.resources().bind_plan()[0].slot, 16);
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod headless;
pub mod layout;
pub mod packing;
pub mod pipeline;
pub mod resource;
#[cfg(feature = "wgpu")]
pub mod wgpu_device;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the ECS crate for convenience.
pub use poser_ecs;

pub use context::RenderContext;
pub use error::{DeviceError, RenderError};
pub use resource::{Handle, ResourceTable};

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use poser_ecs::prelude::*;

    pub use crate::config::{BindSlotConfig, RenderConfig};
    pub use crate::context::RenderContext;
    pub use crate::device::{
        AddressMode, BindEncoder, BufferDesc, CompareFunction, DepthSettings, FilterMode,
        GraphicsDevice, PixelFormat, SamplerDesc, TextureDesc,
    };
    pub use crate::error::{DeviceError, RenderError};
    pub use crate::headless::{BindCall, HeadlessDevice, RecordingEncoder};
    pub use crate::layout::{
        ComputedLayout, FieldLayout, LayoutDescriptor, LayoutError, LayoutPlanner, ScalarKind,
        VertexAttribute, VertexFormat, VertexLayout,
    };
    pub use crate::packing::{pack_selection, ParameterBlock, RecordWriter, VertexPacker};
    pub use crate::pipeline::{BlendMode, PipelineCache, PipelineKey, ShaderRef, Topology};
    pub use crate::resource::{
        BindGroup, BindOp, BufferRole, DeviceObject, Handle, ResourceEntry, ResourceKind,
        ResourceTable, WriteOutcome,
    };

    #[cfg(feature = "wgpu")]
    pub use crate::wgpu_device::{WgpuBindings, WgpuDevice};
}
