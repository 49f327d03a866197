//! The render context: one device, its resources and its pipelines.

use std::sync::Arc;

use crate::config::RenderConfig;
use crate::device::{BindEncoder, GraphicsDevice};
use crate::error::RenderError;
use crate::packing::ParameterBlock;
use crate::pipeline::{PipelineCache, PipelineKey};
use crate::resource::{BufferRole, Handle, ResourceTable, WriteOutcome};

/// Owns a [`ResourceTable`] and a [`PipelineCache`] for one device.
///
/// Create one per device and pass it to whatever needs to allocate or bind;
/// there is no global instance.
pub struct RenderContext<D: GraphicsDevice> {
    resources: ResourceTable<D>,
    pipelines: PipelineCache<D>,
}

impl<D: GraphicsDevice> RenderContext<D> {
    pub fn new(device: Arc<D>, config: RenderConfig) -> Self {
        Self {
            resources: ResourceTable::new(device, config),
            pipelines: PipelineCache::new(),
        }
    }

    /// Context with the default configuration.
    pub fn with_device(device: D) -> Self {
        Self::new(Arc::new(device), RenderConfig::default())
    }

    pub fn device(&self) -> &Arc<D> {
        self.resources.device()
    }

    pub fn config(&self) -> &RenderConfig {
        self.resources.config()
    }

    pub fn resources(&self) -> &ResourceTable<D> {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceTable<D> {
        &mut self.resources
    }

    pub fn pipelines(&self) -> &PipelineCache<D> {
        &self.pipelines
    }

    /// See [`PipelineCache::get_or_create`].
    pub fn pipeline(&mut self, key: &PipelineKey) -> Result<Handle, RenderError> {
        self.pipelines.get_or_create(&mut self.resources, key)
    }

    /// Upload a parameter block under `label`: allocated on first use,
    /// updated in place afterwards.
    ///
    /// An existing buffer is never reallocated. If the block no longer fits,
    /// the bytes that do fit are written and [`RenderError::Truncated`] is
    /// returned. A label held by a non-buffer resource is
    /// [`RenderError::LabelInUse`].
    pub fn upload_block(
        &mut self,
        label: &str,
        role: BufferRole,
        block: &ParameterBlock,
    ) -> Result<Handle, RenderError> {
        let bytes = block.as_bytes();
        let Some(handle) = self.resources.find_buffer(label)? else {
            return self
                .resources
                .allocate(label, role, bytes.len() as u64, Some(bytes));
        };
        match self.resources.write(handle, bytes) {
            WriteOutcome::Written { .. } => Ok(handle),
            WriteOutcome::Truncated { written, dropped } => Err(RenderError::Truncated {
                label: label.to_owned(),
                written,
                dropped,
            }),
            WriteOutcome::UnknownHandle | WriteOutcome::NotABuffer => Err(RenderError::LabelInUse {
                label: label.to_owned(),
                kind: "resource",
            }),
        }
    }

    /// See [`ResourceTable::bind_all`].
    pub fn bind_all<'r, E: BindEncoder<'r, D>>(&'r self, encoder: &mut E) -> usize {
        self.resources.bind_all(encoder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, RecordingEncoder};
    use crate::layout::{LayoutDescriptor, LayoutPlanner, ScalarKind};

    #[test]
    fn upload_block_reuses_buffer() {
        let mut ctx = RenderContext::with_device(HeadlessDevice::new());
        let layout = LayoutPlanner::uniform()
            .plan(&LayoutDescriptor::new().with("exposure", ScalarKind::Float))
            .unwrap();
        let mut block = ParameterBlock::new(&layout);

        block.set("exposure", 1.0f32).unwrap();
        let first = ctx.upload_block("exposure", BufferRole::Uniform, &block).unwrap();
        block.set("exposure", 2.0f32).unwrap();
        let second = ctx.upload_block("exposure", BufferRole::Uniform, &block).unwrap();

        assert_eq!(first, second);
        assert_eq!(ctx.resources().contents(first), Some(block.as_bytes()));
        let mut enc = RecordingEncoder::new();
        assert_eq!(ctx.bind_all(&mut enc), 1);
    }

    #[test]
    fn upload_block_reports_oversized_block() {
        let mut ctx = RenderContext::with_device(HeadlessDevice::new());
        let small = LayoutPlanner::uniform()
            .plan(&LayoutDescriptor::new().with("exposure", ScalarKind::Float))
            .unwrap();
        let large = LayoutPlanner::uniform()
            .plan(
                &LayoutDescriptor::new()
                    .with("view_proj", ScalarKind::Float4x4)
                    .with("exposure", ScalarKind::Float),
            )
            .unwrap();
        assert_eq!(large.stride(), 80);

        let first = ctx
            .upload_block("blk", BufferRole::Uniform, &ParameterBlock::new(&small))
            .unwrap();
        let mut block = ParameterBlock::new(&large);
        block.set("exposure", 2.0f32).unwrap();
        let err = ctx.upload_block("blk", BufferRole::Uniform, &block).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Truncated {
                written: 16,
                dropped: 64,
                ..
            }
        ));
        // Same buffer, still 16 bytes, holding the prefix that fit.
        assert_eq!(ctx.resources().find("blk"), Some(first));
        assert_eq!(ctx.resources().contents(first), Some(&block.as_bytes()[..16]));
    }

    #[test]
    fn upload_block_refuses_pipeline_and_texture_labels() {
        use crate::device::{PixelFormat, TextureDesc};
        use crate::layout::VertexLayout;
        use crate::pipeline::ShaderRef;

        let device = HeadlessDevice::new().with_shader("camera.wgsl", &["vs_main"]);
        let mut ctx = RenderContext::with_device(device);
        let key = PipelineKey::new(
            "camera",
            ShaderRef::vertex_only("camera.wgsl", "vs_main"),
            VertexLayout::empty(),
            PixelFormat::Bgra8Unorm,
        );
        let pipeline = ctx.pipeline(&key).unwrap();
        let layout = LayoutPlanner::uniform()
            .plan(&LayoutDescriptor::new().with("exposure", ScalarKind::Float))
            .unwrap();
        let block = ParameterBlock::new(&layout);

        // Pipelines do not take part in label lookup.
        let camera = ctx.upload_block("camera", BufferRole::Uniform, &block).unwrap();
        assert_ne!(camera, pipeline);
        assert_eq!(ctx.resources().contents(camera), Some(block.as_bytes()));

        ctx.resources_mut()
            .allocate_texture("albedo", &TextureDesc::new(1, 1, PixelFormat::Rgba8Unorm), None)
            .unwrap();
        assert!(matches!(
            ctx.upload_block("albedo", BufferRole::Material, &block),
            Err(RenderError::LabelInUse { kind: "texture", .. })
        ));
    }
}
