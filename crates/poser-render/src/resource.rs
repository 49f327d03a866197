//! Handle-addressed GPU resources.
//!
//! [`ResourceTable`] owns every buffer, texture, pipeline, depth state and
//! sampler created through it. Callers hold opaque [`Handle`]s. Buffers keep
//! a CPU shadow copy so content updates can be read back and so partial
//! writes can be widened to the device's write alignment without touching
//! bytes the caller did not write.
//!
//! Binding is deterministic: [`ResourceTable::bind_plan`] walks the bind
//! groups in [`BindGroup::ORDER`] and, inside a group, resources in the
//! order they were allocated. The n-th resource of a group binds to
//! `base(group) + n`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use poser_ecs::{HandleAllocator, RawHandle};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RenderConfig;
use crate::device::{
    zeroed_bytes, BindEncoder, BufferDesc, DepthSettings, GraphicsDevice, SamplerDesc, TextureDesc,
    WRITE_ALIGNMENT,
};
use crate::error::{DeviceError, RenderError};

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Opaque identifier of a resource in a [`ResourceTable`].
///
/// Handles compare by identity only; there is no ordering between them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(RawHandle);

impl Handle {
    pub fn to_raw(self) -> u64 {
        self.0.to_raw()
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(RawHandle::from_raw(raw))
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// What a buffer is used for. Decides its bind group and device usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferRole {
    Vertex,
    Index,
    Uniform,
    Material,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Buffer(BufferRole),
    Texture,
    Pipeline,
    DepthState,
    Sampler,
}

impl ResourceKind {
    /// The bind group this kind is attached through, if any.
    pub fn bind_group(self) -> Option<BindGroup> {
        match self {
            Self::Buffer(BufferRole::Vertex) => Some(BindGroup::Vertex),
            Self::Buffer(BufferRole::Uniform) => Some(BindGroup::Uniform),
            Self::Buffer(BufferRole::Material) => Some(BindGroup::Material),
            Self::Buffer(BufferRole::Custom) => Some(BindGroup::Custom),
            Self::Texture => Some(BindGroup::Texture),
            Self::Buffer(BufferRole::Index)
            | Self::Pipeline
            | Self::DepthState
            | Self::Sampler => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Texture => "texture",
            Self::Pipeline => "pipeline",
            Self::DepthState => "depth state",
            Self::Sampler => "sampler",
        }
    }
}

/// Groups bound by [`ResourceTable::bind_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindGroup {
    Vertex,
    Uniform,
    Material,
    Texture,
    Custom,
}

impl BindGroup {
    /// Bind order.
    pub const ORDER: [BindGroup; 5] = [
        BindGroup::Vertex,
        BindGroup::Uniform,
        BindGroup::Material,
        BindGroup::Texture,
        BindGroup::Custom,
    ];
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// The device object behind a handle.
pub enum DeviceObject<D: GraphicsDevice> {
    Buffer(D::Buffer),
    Texture(D::Texture),
    Pipeline(D::Pipeline),
    DepthState(D::DepthState),
    Sampler(D::Sampler),
}

/// One tracked resource.
pub struct ResourceEntry<D: GraphicsDevice> {
    handle: Handle,
    kind: ResourceKind,
    label: Option<String>,
    size: u64,
    order: u64,
    object: DeviceObject<D>,
    /// Buffer bytes, padded to `WRITE_ALIGNMENT`. Empty for other kinds.
    shadow: Vec<u8>,
}

impl<D: GraphicsDevice> ResourceEntry<D> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Logical byte size (buffers: as requested; textures: texel bytes).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Position among resources of the same kind, in allocation order.
    pub fn order(&self) -> u64 {
        self.order
    }

    pub fn object(&self) -> &DeviceObject<D> {
        &self.object
    }
}

impl<D: GraphicsDevice> fmt::Debug for ResourceEntry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("size", &self.size)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Result of [`ResourceTable::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { bytes: usize },
    /// Only the bytes that fit were written.
    Truncated { written: usize, dropped: usize },
    UnknownHandle,
    NotABuffer,
}

impl WriteOutcome {
    /// True only when every byte was written.
    pub fn is_complete(self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// One step of a bind plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindOp {
    pub group: BindGroup,
    pub slot: u32,
    pub handle: Handle,
}

// ---------------------------------------------------------------------------
// ResourceTable
// ---------------------------------------------------------------------------

#[inline]
fn align_up(value: u64) -> Option<u64> {
    value.div_ceil(WRITE_ALIGNMENT).checked_mul(WRITE_ALIGNMENT)
}

/// Owns device resources and addresses them by [`Handle`].
pub struct ResourceTable<D: GraphicsDevice> {
    device: Arc<D>,
    config: RenderConfig,
    handles: HandleAllocator,
    entries: HashMap<Handle, ResourceEntry<D>>,
    labels: HashMap<String, Handle>,
    counters: HashMap<ResourceKind, u64>,
}

impl<D: GraphicsDevice> fmt::Debug for ResourceTable<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTable")
            .field("resources", &self.entries.len())
            .field("labels", &self.labels.len())
            .finish_non_exhaustive()
    }
}

impl<D: GraphicsDevice> ResourceTable<D> {
    pub fn new(device: Arc<D>, config: RenderConfig) -> Self {
        Self {
            device,
            config,
            handles: HandleAllocator::new(),
            entries: HashMap::new(),
            labels: HashMap::new(),
            counters: HashMap::new(),
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.entries.contains_key(&handle)
    }

    // -- allocation ---------------------------------------------------------

    /// Allocate a buffer of `size` bytes.
    ///
    /// Without `contents` the buffer is zero-filled; shorter contents are
    /// zero-padded. A non-empty `label` makes the buffer findable with
    /// [`find`](Self::find).
    ///
    /// The device object is created first, so a device that cannot hold the
    /// buffer rejects it before any host memory is spent on the shadow copy.
    pub fn allocate(
        &mut self,
        label: &str,
        role: BufferRole,
        size: u64,
        contents: Option<&[u8]>,
    ) -> Result<Handle, RenderError> {
        if size == 0 {
            return Err(RenderError::ZeroSizedBuffer {
                label: label.to_owned(),
            });
        }
        let len = contents.map_or(0, <[u8]>::len) as u64;
        if len > size {
            return Err(RenderError::ContentTooLarge {
                label: label.to_owned(),
                size,
                len,
            });
        }

        let padded = align_up(size).ok_or_else(|| RenderError::BufferTooLarge {
            label: label.to_owned(),
            size,
        })?;

        let kind = ResourceKind::Buffer(role);
        let device_label = self.config.device_label(label);
        let desc = BufferDesc {
            label: &device_label,
            role,
            size: padded,
        };
        let buffer = self
            .device
            .create_buffer(&desc, None)
            .map_err(|source| device_failure(kind, label, source))?;
        let mut shadow =
            zeroed_bytes(padded).map_err(|source| device_failure(kind, label, source))?;
        if let Some(bytes) = contents.filter(|bytes| !bytes.is_empty()) {
            shadow[..bytes.len()].copy_from_slice(bytes);
            let hi = align_up(len).map_or(padded, |hi| hi.min(padded));
            self.device.write_buffer(&buffer, 0, &shadow[..hi as usize]);
        }

        let handle = self.insert(label, kind, size, DeviceObject::Buffer(buffer), shadow);
        debug!(%handle, label, ?role, size, "allocated buffer");
        Ok(handle)
    }

    /// Return the buffer registered under `label`, or allocate one for it.
    /// An existing buffer is returned as is; `role`, `size` and `contents`
    /// only apply to a fresh allocation. A label held by a texture, sampler
    /// or depth state is [`RenderError::LabelInUse`].
    pub fn get_or_allocate(
        &mut self,
        label: &str,
        role: BufferRole,
        size: u64,
        contents: Option<&[u8]>,
    ) -> Result<Handle, RenderError> {
        match self.find_buffer(label)? {
            Some(handle) => Ok(handle),
            None => self.allocate(label, role, size, contents),
        }
    }

    /// The resource most recently registered under `label`. Pipelines are
    /// not registered by label; look them up through the
    /// [`PipelineCache`](crate::pipeline::PipelineCache).
    pub fn find(&self, label: &str) -> Option<Handle> {
        self.labels.get(label).copied()
    }

    /// Like [`find`](Self::find), but the label must name a buffer if it
    /// names anything.
    pub(crate) fn find_buffer(&self, label: &str) -> Result<Option<Handle>, RenderError> {
        let Some(handle) = self.find(label) else {
            return Ok(None);
        };
        match self.entries.get(&handle).map(|e| e.kind) {
            Some(ResourceKind::Buffer(_)) => Ok(Some(handle)),
            Some(kind) => Err(RenderError::LabelInUse {
                label: label.to_owned(),
                kind: kind.name(),
            }),
            None => Ok(None),
        }
    }

    pub fn allocate_texture(
        &mut self,
        label: &str,
        desc: &TextureDesc,
        contents: Option<&[u8]>,
    ) -> Result<Handle, RenderError> {
        let texture = self
            .device
            .create_texture(&self.config.device_label(label), desc, contents)
            .map_err(|source| device_failure(ResourceKind::Texture, label, source))?;
        let handle = self.insert(
            label,
            ResourceKind::Texture,
            desc.byte_size(),
            DeviceObject::Texture(texture),
            Vec::new(),
        );
        debug!(
            %handle,
            label,
            width = desc.width,
            height = desc.height,
            format = ?desc.format,
            "allocated texture"
        );
        Ok(handle)
    }

    pub fn allocate_sampler(
        &mut self,
        label: &str,
        desc: &SamplerDesc,
    ) -> Result<Handle, RenderError> {
        let sampler = self
            .device
            .create_sampler(&self.config.device_label(label), desc)
            .map_err(|source| device_failure(ResourceKind::Sampler, label, source))?;
        let handle = self.insert(
            label,
            ResourceKind::Sampler,
            0,
            DeviceObject::Sampler(sampler),
            Vec::new(),
        );
        debug!(%handle, label, "allocated sampler");
        Ok(handle)
    }

    pub fn allocate_depth_state(
        &mut self,
        label: &str,
        settings: &DepthSettings,
    ) -> Result<Handle, RenderError> {
        let state = self
            .device
            .create_depth_state(&self.config.device_label(label), settings)
            .map_err(|source| device_failure(ResourceKind::DepthState, label, source))?;
        let handle = self.insert(
            label,
            ResourceKind::DepthState,
            0,
            DeviceObject::DepthState(state),
            Vec::new(),
        );
        debug!(%handle, label, ?settings, "allocated depth state");
        Ok(handle)
    }

    /// Track a pipeline created by the [`PipelineCache`](crate::pipeline::PipelineCache).
    /// The label is kept on the entry but not registered for [`find`](Self::find).
    pub(crate) fn insert_pipeline(&mut self, label: &str, pipeline: D::Pipeline) -> Handle {
        self.insert(
            label,
            ResourceKind::Pipeline,
            0,
            DeviceObject::Pipeline(pipeline),
            Vec::new(),
        )
    }

    fn insert(
        &mut self,
        label: &str,
        kind: ResourceKind,
        size: u64,
        object: DeviceObject<D>,
        shadow: Vec<u8>,
    ) -> Handle {
        let handle = Handle(self.handles.allocate());
        let counter = self.counters.entry(kind).or_insert(0);
        let order = *counter;
        *counter += 1;

        let label = (!label.is_empty()).then(|| label.to_owned());
        if let Some(name) = label.as_ref().filter(|_| kind != ResourceKind::Pipeline) {
            self.labels.insert(name.clone(), handle);
        }
        self.entries.insert(
            handle,
            ResourceEntry {
                handle,
                kind,
                label,
                size,
                order,
                object,
                shadow,
            },
        );
        handle
    }

    // -- content updates ----------------------------------------------------

    /// Overwrite a buffer from its start. `false` unless every byte fit.
    pub fn update(&mut self, handle: Handle, bytes: &[u8]) -> bool {
        self.write(handle, bytes).is_complete()
    }

    /// Overwrite a buffer from its start, in place.
    pub fn write(&mut self, handle: Handle, bytes: &[u8]) -> WriteOutcome {
        self.write_at(handle, 0, bytes)
    }

    /// Overwrite a buffer starting at `offset`, in place.
    ///
    /// Bytes past the end of the allocation are dropped and reported as
    /// [`WriteOutcome::Truncated`]; the buffer is never reallocated.
    pub fn write_at(&mut self, handle: Handle, offset: u64, bytes: &[u8]) -> WriteOutcome {
        let Some(entry) = self.entries.get_mut(&handle) else {
            warn!(%handle, "write to unknown resource handle");
            return WriteOutcome::UnknownHandle;
        };
        let DeviceObject::Buffer(buffer) = &entry.object else {
            warn!(%handle, kind = ?entry.kind, "write to a resource that is not a buffer");
            return WriteOutcome::NotABuffer;
        };

        let start = offset.min(entry.size);
        let written = bytes.len().min((entry.size - start) as usize);
        if written > 0 {
            let end = start + written as u64;
            entry.shadow[start as usize..end as usize].copy_from_slice(&bytes[..written]);
            let lo = start / WRITE_ALIGNMENT * WRITE_ALIGNMENT;
            let hi = align_up(end).map_or(entry.shadow.len() as u64, |hi| {
                hi.min(entry.shadow.len() as u64)
            });
            self.device
                .write_buffer(buffer, lo, &entry.shadow[lo as usize..hi as usize]);
        }

        if written < bytes.len() {
            let dropped = bytes.len() - written;
            warn!(
                %handle,
                label = entry.label.as_deref().unwrap_or(""),
                size = entry.size,
                offset,
                written,
                dropped,
                "buffer update truncated"
            );
            WriteOutcome::Truncated { written, dropped }
        } else {
            WriteOutcome::Written { bytes: written }
        }
    }

    /// Current bytes of a buffer.
    pub fn contents(&self, handle: Handle) -> Option<&[u8]> {
        let entry = self.entries.get(&handle)?;
        match entry.object {
            DeviceObject::Buffer(_) => Some(&entry.shadow[..entry.size as usize]),
            _ => None,
        }
    }

    // -- lookup -------------------------------------------------------------

    pub fn get(&self, handle: Handle) -> Option<&ResourceEntry<D>> {
        self.entries.get(&handle)
    }

    pub fn buffer(&self, handle: Handle) -> Option<&D::Buffer> {
        match &self.entries.get(&handle)?.object {
            DeviceObject::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn texture(&self, handle: Handle) -> Option<&D::Texture> {
        match &self.entries.get(&handle)?.object {
            DeviceObject::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn pipeline(&self, handle: Handle) -> Option<&D::Pipeline> {
        match &self.entries.get(&handle)?.object {
            DeviceObject::Pipeline(p) => Some(p),
            _ => None,
        }
    }

    pub fn depth_state(&self, handle: Handle) -> Option<&D::DepthState> {
        match &self.entries.get(&handle)?.object {
            DeviceObject::DepthState(d) => Some(d),
            _ => None,
        }
    }

    pub fn sampler(&self, handle: Handle) -> Option<&D::Sampler> {
        match &self.entries.get(&handle)?.object {
            DeviceObject::Sampler(s) => Some(s),
            _ => None,
        }
    }

    // -- release ------------------------------------------------------------

    /// Drop a resource. Its handle stays dead forever.
    pub fn release(&mut self, handle: Handle) -> bool {
        let Some(entry) = self.entries.remove(&handle) else {
            return false;
        };
        if let Some(name) = &entry.label {
            if self.labels.get(name) == Some(&handle) {
                self.labels.remove(name);
            }
        }
        self.handles.release(handle.0);
        debug!(%handle, kind = entry.kind.name(), "released resource");
        true
    }

    // -- binding ------------------------------------------------------------

    /// The bind calls [`bind_all`](Self::bind_all) would make, in order.
    pub fn bind_plan(&self) -> Vec<BindOp> {
        let mut plan = Vec::new();
        for group in BindGroup::ORDER {
            let mut members: Vec<&ResourceEntry<D>> = self
                .entries
                .values()
                .filter(|e| e.kind.bind_group() == Some(group))
                .collect();
            members.sort_by_key(|e| e.order);
            let base = self.config.bind_slots.base(group);
            plan.extend(members.iter().enumerate().map(|(n, e)| BindOp {
                group,
                slot: base + n as u32,
                handle: e.handle,
            }));
        }
        plan
    }

    /// Attach every bindable resource to `encoder`. Returns the number of
    /// bind calls made.
    pub fn bind_all<'r, E: BindEncoder<'r, D>>(&'r self, encoder: &mut E) -> usize {
        let plan = self.bind_plan();
        for op in &plan {
            match self.entries.get(&op.handle).map(|e| &e.object) {
                Some(DeviceObject::Buffer(buffer)) => {
                    encoder.bind_buffer(op.group, op.slot, buffer)
                }
                Some(DeviceObject::Texture(texture)) => encoder.bind_texture(op.slot, texture),
                _ => {}
            }
        }
        plan.len()
    }
}

fn device_failure(kind: ResourceKind, label: &str, source: DeviceError) -> RenderError {
    warn!(label, kind = kind.name(), error = %source, "device rejected resource");
    RenderError::Device {
        kind: kind.name(),
        label: label.to_owned(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
