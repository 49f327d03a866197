//! A CPU-side [`GraphicsDevice`] for tests, tooling and machines without a
//! GPU.
//!
//! Buffers and textures are byte vectors. Shader modules are registered by
//! name together with the entry points they declare, so pipeline creation
//! fails the same way a real device does when a module or entry point is
//! missing. An optional memory budget makes allocations fail with
//! [`DeviceError::OutOfMemory`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::device::{
    zeroed_bytes, BindEncoder, BufferDesc, DepthSettings, GraphicsDevice, SamplerDesc, TextureDesc,
};
use crate::error::DeviceError;
use crate::pipeline::PipelineKey;
use crate::resource::{BindGroup, BufferRole};

// ---------------------------------------------------------------------------
// Memory accounting
// ---------------------------------------------------------------------------

/// Bytes charged against the device; returned when dropped.
struct Allocation {
    bytes: u64,
    counter: Arc<AtomicU64>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.counter.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// Device objects
// ---------------------------------------------------------------------------

pub struct HeadlessBuffer {
    id: u64,
    label: String,
    role: BufferRole,
    bytes: Mutex<Vec<u8>>,
    _allocation: Allocation,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> BufferRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the device-side bytes.
    pub fn read(&self) -> Vec<u8> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl fmt::Debug for HeadlessBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessBuffer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

pub struct HeadlessTexture {
    id: u64,
    label: String,
    desc: TextureDesc,
    texels: Vec<u8>,
    _allocation: Allocation,
}

impl HeadlessTexture {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn texels(&self) -> &[u8] {
        &self.texels
    }
}

impl fmt::Debug for HeadlessTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessTexture")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct HeadlessPipeline {
    id: u64,
    key: PipelineKey,
}

impl HeadlessPipeline {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The key the pipeline was compiled from.
    pub fn key(&self) -> &PipelineKey {
        &self.key
    }
}

#[derive(Debug)]
pub struct HeadlessDepthState {
    pub id: u64,
    pub settings: DepthSettings,
}

#[derive(Debug)]
pub struct HeadlessSampler {
    pub id: u64,
    pub desc: SamplerDesc,
}

// ---------------------------------------------------------------------------
// HeadlessDevice
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct HeadlessDevice {
    /// Module name -> declared entry points.
    shaders: Mutex<HashMap<String, HashSet<String>>>,
    budget: Option<u64>,
    allocated: Arc<AtomicU64>,
    next_id: AtomicU64,
    pipelines_compiled: AtomicUsize,
    buffer_writes: AtomicUsize,
}

impl HeadlessDevice {
    /// A device with unlimited memory and no shader modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that fails allocations beyond `bytes` live bytes.
    pub fn with_memory_budget(bytes: u64) -> Self {
        Self {
            budget: Some(bytes),
            ..Self::default()
        }
    }

    /// Builder form of [`register_shader`](Self::register_shader).
    pub fn with_shader(self, module: &str, entry_points: &[&str]) -> Self {
        self.register_shader(module, entry_points);
        self
    }

    /// Register (or extend) a shader module and its entry points.
    pub fn register_shader(&self, module: &str, entry_points: &[&str]) {
        let mut shaders = self.shaders.lock().unwrap_or_else(PoisonError::into_inner);
        shaders
            .entry(module.to_owned())
            .or_default()
            .extend(entry_points.iter().map(|e| (*e).to_owned()));
    }

    /// Live bytes held by buffers and textures.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    /// Pipelines successfully compiled so far.
    pub fn pipelines_compiled(&self) -> usize {
        self.pipelines_compiled.load(Ordering::Acquire)
    }

    /// Calls to `write_buffer` so far.
    pub fn buffer_writes(&self) -> usize {
        self.buffer_writes.load(Ordering::Acquire)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn reserve(&self, bytes: u64) -> Result<Allocation, DeviceError> {
        let budget = self.budget;
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let total = current.checked_add(bytes)?;
                match budget {
                    Some(limit) if total > limit => None,
                    _ => Some(total),
                }
            })
            .map_err(|current| DeviceError::OutOfMemory {
                requested: bytes,
                available: budget.unwrap_or(u64::MAX).saturating_sub(current),
            })?;
        Ok(Allocation {
            bytes,
            counter: Arc::clone(&self.allocated),
        })
    }

    fn check_entry_point(&self, module: &str, entry: &str) -> Result<(), DeviceError> {
        let shaders = self.shaders.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = shaders.get(module).ok_or_else(|| DeviceError::MissingShaderModule {
            module: module.to_owned(),
        })?;
        if entries.contains(entry) {
            Ok(())
        } else {
            Err(DeviceError::MissingEntryPoint {
                module: module.to_owned(),
                entry: entry.to_owned(),
            })
        }
    }
}

impl GraphicsDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type Pipeline = HeadlessPipeline;
    type DepthState = HeadlessDepthState;
    type Sampler = HeadlessSampler;

    fn create_buffer(
        &self,
        desc: &BufferDesc<'_>,
        contents: Option<&[u8]>,
    ) -> Result<HeadlessBuffer, DeviceError> {
        let allocation = self.reserve(desc.size)?;
        let mut bytes = zeroed_bytes(desc.size)?;
        if let Some(init) = contents {
            let n = init.len().min(bytes.len());
            bytes[..n].copy_from_slice(&init[..n]);
        }
        Ok(HeadlessBuffer {
            id: self.next_id(),
            label: desc.label.to_owned(),
            role: desc.role,
            bytes: Mutex::new(bytes),
            _allocation: allocation,
        })
    }

    fn write_buffer(&self, buffer: &HeadlessBuffer, offset: u64, bytes: &[u8]) {
        let mut dst = buffer.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        let start = (offset as usize).min(dst.len());
        let n = bytes.len().min(dst.len() - start);
        dst[start..start + n].copy_from_slice(&bytes[..n]);
        self.buffer_writes.fetch_add(1, Ordering::AcqRel);
    }

    fn create_texture(
        &self,
        label: &str,
        desc: &TextureDesc,
        contents: Option<&[u8]>,
    ) -> Result<HeadlessTexture, DeviceError> {
        let expected = desc.byte_size();
        if let Some(data) = contents.filter(|data| data.len() as u64 != expected) {
            return Err(DeviceError::InvalidTextureData {
                expected,
                actual: data.len() as u64,
            });
        }
        if desc.render_target && desc.format.is_depth() {
            return Err(DeviceError::InvalidFormat {
                format: desc.format,
                usage: "a color render target",
            });
        }
        let allocation = self.reserve(expected)?;
        let texels = match contents {
            Some(data) => data.to_vec(),
            None => zeroed_bytes(expected)?,
        };
        Ok(HeadlessTexture {
            id: self.next_id(),
            label: label.to_owned(),
            desc: *desc,
            texels,
            _allocation: allocation,
        })
    }

    fn create_pipeline(&self, key: &PipelineKey) -> Result<HeadlessPipeline, DeviceError> {
        self.check_entry_point(&key.shader.module, &key.shader.vertex_entry)?;
        if let Some(fragment) = &key.shader.fragment_entry {
            self.check_entry_point(&key.shader.module, fragment)?;
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
        self.pipelines_compiled.fetch_add(1, Ordering::AcqRel);
        Ok(HeadlessPipeline {
            id: self.next_id(),
            key: key.clone(),
        })
    }

    fn create_depth_state(
        &self,
        _label: &str,
        settings: &DepthSettings,
    ) -> Result<HeadlessDepthState, DeviceError> {
        Ok(HeadlessDepthState {
            id: self.next_id(),
            settings: *settings,
        })
    }

    fn create_sampler(
        &self,
        _label: &str,
        desc: &SamplerDesc,
    ) -> Result<HeadlessSampler, DeviceError> {
        Ok(HeadlessSampler {
            id: self.next_id(),
            desc: *desc,
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingEncoder
// ---------------------------------------------------------------------------

/// One recorded bind call. Objects are identified by their device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindCall {
    Buffer { group: BindGroup, slot: u32, buffer: u64 },
    Texture { slot: u32, texture: u64 },
}

/// A [`BindEncoder`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingEncoder {
    calls: Vec<BindCall>,
}

impl RecordingEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[BindCall] {
        &self.calls
    }

    /// Take the recorded calls, leaving the encoder empty.
    pub fn take(&mut self) -> Vec<BindCall> {
        std::mem::take(&mut self.calls)
    }
}

impl<'r> BindEncoder<'r, HeadlessDevice> for RecordingEncoder {
    fn bind_buffer(&mut self, group: BindGroup, slot: u32, buffer: &'r HeadlessBuffer) {
        self.calls.push(BindCall::Buffer {
            group,
            slot,
            buffer: buffer.id,
        });
    }

    fn bind_texture(&mut self, slot: u32, texture: &'r HeadlessTexture) {
        self.calls.push(BindCall::Texture {
            slot,
            texture: texture.id,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
