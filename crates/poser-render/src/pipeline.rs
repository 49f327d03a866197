//! Pipeline keys and the pipeline cache.
//!
//! A [`PipelineKey`] describes everything that goes into compiling a render
//! pipeline. The [`PipelineCache`] compiles each distinct key once and hands
//! out the same [`Handle`] for every structurally equal key afterwards.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::device::{DepthSettings, GraphicsDevice, PixelFormat};
use crate::error::RenderError;
use crate::layout::VertexLayout;
use crate::resource::{Handle, ResourceTable};

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// A shader module and the entry points a pipeline uses from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderRef {
    pub module: String,
    pub vertex_entry: String,
    /// `None` for depth-only passes.
    pub fragment_entry: Option<String>,
}

impl ShaderRef {
    pub fn new(module: &str, vertex_entry: &str, fragment_entry: &str) -> Self {
        Self {
            module: module.to_owned(),
            vertex_entry: vertex_entry.to_owned(),
            fragment_entry: Some(fragment_entry.to_owned()),
        }
    }

    pub fn vertex_only(module: &str, vertex_entry: &str) -> Self {
        Self {
            module: module.to_owned(),
            vertex_entry: vertex_entry.to_owned(),
            fragment_entry: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Opaque,
    AlphaBlend,
    PremultipliedAlpha,
    Additive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Topology {
    #[default]
    TriangleList,
    TriangleStrip,
    LineList,
    PointList,
}

/// Structural identity of a render pipeline. Two keys name the same
/// pipeline exactly when every field is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineKey {
    pub label: String,
    pub shader: ShaderRef,
    pub vertex_layout: VertexLayout,
    pub color_format: PixelFormat,
    pub depth_format: Option<PixelFormat>,
    pub depth: DepthSettings,
    pub blend: BlendMode,
    pub topology: Topology,
}

impl PipelineKey {
    /// An opaque triangle-list pipeline without a depth attachment.
    pub fn new(
        label: &str,
        shader: ShaderRef,
        vertex_layout: VertexLayout,
        color_format: PixelFormat,
    ) -> Self {
        Self {
            label: label.to_owned(),
            shader,
            vertex_layout,
            color_format,
            depth_format: None,
            depth: DepthSettings::default(),
            blend: BlendMode::Opaque,
            topology: Topology::TriangleList,
        }
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_depth(mut self, format: PixelFormat, settings: DepthSettings) -> Self {
        self.depth_format = Some(format);
        self.depth = settings;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }
}

// ---------------------------------------------------------------------------
// PipelineCache
// ---------------------------------------------------------------------------

/// Compiles pipelines on first request and reuses them afterwards.
///
/// Compiled pipelines live in the [`ResourceTable`]; the cache only maps keys
/// to their handles.
pub struct PipelineCache<D: GraphicsDevice> {
    entries: HashMap<PipelineKey, Handle>,
    hits: u64,
    misses: u64,
    _device: PhantomData<fn() -> D>,
}

impl<D: GraphicsDevice> Default for PipelineCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: GraphicsDevice> fmt::Debug for PipelineCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCache")
            .field("pipelines", &self.entries.len())
            .field("hits", &self.hits)
            .field("misses", &self.misses)
            .finish()
    }
}

impl<D: GraphicsDevice> PipelineCache<D> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            _device: PhantomData,
        }
    }

    /// Handle of the pipeline for `key`, compiling it if needed.
    ///
    /// A compilation failure is returned as is; nothing is cached for the
    /// key, so a later call retries.
    pub fn get_or_create(
        &mut self,
        table: &mut ResourceTable<D>,
        key: &PipelineKey,
    ) -> Result<Handle, RenderError> {
        if let Some(&handle) = self.entries.get(key) {
            if table.contains(handle) {
                self.hits += 1;
                debug!(%handle, label = %key.label, "pipeline cache hit");
                return Ok(handle);
            }
            // Released behind the cache's back.
            self.entries.remove(key);
        }

        self.misses += 1;
        let pipeline = table.device().create_pipeline(key).map_err(|source| {
            warn!(
                label = %key.label,
                module = %key.shader.module,
                error = %source,
                "pipeline creation failed"
            );
            RenderError::PipelineCreation {
                label: key.label.clone(),
                source,
            }
        })?;
        let handle = table.insert_pipeline(&key.label, pipeline);
        debug!(%handle, label = %key.label, module = %key.shader.module, "compiled pipeline");
        self.entries.insert(key.clone(), handle);
        Ok(handle)
    }

    /// Cached handle for `key`, without compiling.
    pub fn get(&self, key: &PipelineKey) -> Option<Handle> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Requests served from the cache.
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Requests that compiled (or tried to compile) a pipeline.
    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Forget `key` and release its pipeline.
    pub fn evict(&mut self, key: &PipelineKey, table: &mut ResourceTable<D>) -> bool {
        match self.entries.remove(key) {
            Some(handle) => table.release(handle),
            None => false,
        }
    }

    /// Release every cached pipeline.
    pub fn clear(&mut self, table: &mut ResourceTable<D>) {
        for (_, handle) in self.entries.drain() {
            table.release(handle);
        }
    }
}
