//! Error types for the resource layer.

use crate::device::PixelFormat;
use crate::layout::LayoutError;

/// Failures reported by a [`GraphicsDevice`](crate::device::GraphicsDevice).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// The device cannot satisfy an allocation.
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    /// No shader module registered under this name.
    #[error("shader module '{module}' is not registered")]
    MissingShaderModule { module: String },

    /// The module exists but does not declare the entry point.
    #[error("shader module '{module}' has no entry point '{entry}'")]
    MissingEntryPoint { module: String, entry: String },

    /// Initial texel data does not match the texture extent.
    #[error("texture data is {actual} bytes, expected {expected}")]
    InvalidTextureData { expected: u64, actual: u64 },

    /// A format used in a role it does not support.
    #[error("format {format:?} cannot be used as {usage}")]
    InvalidFormat {
        format: PixelFormat,
        usage: &'static str,
    },

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors from resource allocation, pipeline creation and configuration.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to create {kind} '{label}': {source}")]
    Device {
        kind: &'static str,
        label: String,
        #[source]
        source: DeviceError,
    },

    #[error("failed to create pipeline '{label}': {source}")]
    PipelineCreation {
        label: String,
        #[source]
        source: DeviceError,
    },

    #[error("buffer '{label}' has zero size")]
    ZeroSizedBuffer { label: String },

    #[error("initial contents for '{label}' are {len} bytes but the allocation is {size} bytes")]
    ContentTooLarge { label: String, size: u64, len: u64 },

    #[error("buffer '{label}' of {size} bytes cannot be addressed")]
    BufferTooLarge { label: String, size: u64 },

    /// A buffer was requested under a label that names another kind.
    #[error("label '{label}' already names a {kind}")]
    LabelInUse { label: String, kind: &'static str },

    /// Upload into an existing buffer that is too small; only the first
    /// `written` bytes landed.
    #[error("upload to '{label}' truncated: {written} bytes written, {dropped} dropped")]
    Truncated {
        label: String,
        written: usize,
        dropped: usize,
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("invalid render configuration: {0}")]
    Config(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_exposes_device_source() {
        let err = RenderError::PipelineCreation {
            label: "skin".into(),
            source: DeviceError::MissingEntryPoint {
                module: "skin.wgsl".into(),
                entry: "vs_main".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("skin"));
        assert!(msg.contains("vs_main"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("shader module 'skin.wgsl' has no entry point 'vs_main'")
        );
    }

    #[test]
    fn layout_errors_convert() {
        let err: RenderError = LayoutError::UnknownField("tint".into()).into();
        assert!(matches!(err, RenderError::Layout(LayoutError::UnknownField(_))));
    }
}
