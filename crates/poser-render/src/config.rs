//! Resource layer configuration.

use serde::{Deserialize, Serialize};

use crate::error::RenderError;
use crate::resource::BindGroup;

/// First slot assigned to each bind group.
///
/// Resources inside a group occupy consecutive slots starting at the base,
/// in insertion order. Vertex buffers bind to vertex-buffer slots; the other
/// groups share one binding namespace, so their ranges should not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindSlotConfig {
    pub vertex: u32,
    pub uniform: u32,
    pub material: u32,
    pub custom: u32,
    pub texture: u32,
}

impl Default for BindSlotConfig {
    fn default() -> Self {
        Self {
            vertex: 0,
            uniform: 8,
            material: 16,
            custom: 24,
            texture: 32,
        }
    }
}

impl BindSlotConfig {
    /// Base slot for `group`.
    pub fn base(&self, group: BindGroup) -> u32 {
        match group {
            BindGroup::Vertex => self.vertex,
            BindGroup::Uniform => self.uniform,
            BindGroup::Material => self.material,
            BindGroup::Texture => self.texture,
            BindGroup::Custom => self.custom,
        }
    }
}

/// Configuration for a [`RenderContext`](crate::context::RenderContext).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub bind_slots: BindSlotConfig,
    /// Prepended to every debug label handed to the device.
    pub label_prefix: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            bind_slots: BindSlotConfig::default(),
            label_prefix: "poser/".to_owned(),
        }
    }
}

impl RenderConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, RenderError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Device label for a logical resource name.
    pub fn device_label(&self, label: &str) -> String {
        format!("{}{}", self.label_prefix, label)
    }
}
