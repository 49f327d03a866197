//! Byte layout planning for vertex attributes and parameter blocks.
//!
//! A [`LayoutDescriptor`] is an ordered list of named fields, each with a
//! [`ScalarKind`], a byte size and an alignment. [`LayoutPlanner::plan`]
//! assigns every field the smallest offset that is a multiple of its
//! alignment and not below the running offset, then rounds the total up to a
//! multiple of the largest alignment so that arrays of the layout stay
//! aligned:
//!
//! ```text
//! [(float, 4, 4), (float3, 12, 16)]
//!
//!  0      4              16                         28     32
//!  ├──────┼── padding ───┼──────── float3 ──────────┼ pad ─┤
//!  float                 offset 16                   stride 32
//! ```
//!
//! The same planner serves per-vertex attribute packing (see
//! [`ComputedLayout::vertex_layout`]) and shader parameter blocks (see
//! [`packing`](crate::packing)). Planning is a pure function of the
//! descriptor.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors produced while planning or writing a layout.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// Alignment must be a non-zero power of two.
    #[error("field '{field}' has invalid alignment {align} (must be a non-zero power of two)")]
    InvalidAlignment { field: String, align: u32 },

    /// Explicit size smaller than the scalar kind needs.
    #[error("field '{field}' of kind {kind:?} needs at least {required} bytes, got {size}")]
    SizeTooSmall {
        field: String,
        kind: ScalarKind,
        size: u32,
        required: u32,
    },

    /// Two fields share a name.
    #[error("duplicate field name '{0}'")]
    DuplicateField(String),

    /// No field with this name in the layout.
    #[error("layout has no field named '{0}'")]
    UnknownField(String),

    /// A value does not fit in its field.
    #[error("value of {value_size} bytes does not fit field '{field}' of {field_size} bytes")]
    ValueTooLarge {
        field: String,
        value_size: usize,
        field_size: u32,
    },

    /// Record index past the end of a packed array.
    #[error("record index {index} out of range for {count} records")]
    IndexOutOfRange { index: usize, count: usize },

    /// The kind cannot be fetched by the vertex stage.
    #[error("field '{field}' of kind {kind:?} cannot be a vertex attribute")]
    NotAVertexAttribute { field: String, kind: ScalarKind },

    /// Offsets or the stride no longer fit in 32 bits.
    #[error("layout overflows 32-bit offsets at field '{field}'")]
    Overflow { field: String },
}

// ---------------------------------------------------------------------------
// ScalarKind
// ---------------------------------------------------------------------------

/// Shader-visible scalar, vector and matrix kinds.
///
/// Default sizes and alignments follow shader buffer rules: three-component
/// vectors occupy 12 bytes but align to 16, and each `float3x3` column is
/// padded to 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarKind {
    Float,
    Float2,
    Float3,
    Float4,
    Int,
    Int2,
    Int3,
    Int4,
    #[serde(rename = "uint")]
    UInt,
    #[serde(rename = "uint2")]
    UInt2,
    #[serde(rename = "uint3")]
    UInt3,
    #[serde(rename = "uint4")]
    UInt4,
    Half,
    Half2,
    Half4,
    #[serde(rename = "uchar4_norm")]
    UChar4Norm,
    Float2x2,
    Float3x3,
    Float4x4,
}

impl ScalarKind {
    /// Natural byte size.
    pub fn size(self) -> u32 {
        match self {
            Self::Half => 2,
            Self::Float | Self::Int | Self::UInt | Self::Half2 | Self::UChar4Norm => 4,
            Self::Float2 | Self::Int2 | Self::UInt2 | Self::Half4 => 8,
            Self::Float3 | Self::Int3 | Self::UInt3 => 12,
            Self::Float4 | Self::Int4 | Self::UInt4 | Self::Float2x2 => 16,
            Self::Float3x3 => 48,
            Self::Float4x4 => 64,
        }
    }

    /// Alignment inside a shader parameter block.
    pub fn alignment(self) -> u32 {
        match self {
            Self::Half => 2,
            Self::Float | Self::Int | Self::UInt | Self::Half2 | Self::UChar4Norm => 4,
            Self::Float2 | Self::Int2 | Self::UInt2 | Self::Half4 | Self::Float2x2 => 8,
            Self::Float3
            | Self::Int3
            | Self::UInt3
            | Self::Float4
            | Self::Int4
            | Self::UInt4
            | Self::Float3x3
            | Self::Float4x4 => 16,
        }
    }

    /// Alignment for tightly packed vertex attributes.
    pub fn packed_alignment(self) -> u32 {
        match self {
            Self::Half => 2,
            _ => 4,
        }
    }

    /// The vertex fetch format, if this kind can be a vertex attribute.
    pub fn vertex_format(self) -> Option<VertexFormat> {
        Some(match self {
            Self::Float => VertexFormat::Float32,
            Self::Float2 => VertexFormat::Float32x2,
            Self::Float3 => VertexFormat::Float32x3,
            Self::Float4 => VertexFormat::Float32x4,
            Self::Int => VertexFormat::Sint32,
            Self::Int2 => VertexFormat::Sint32x2,
            Self::Int3 => VertexFormat::Sint32x3,
            Self::Int4 => VertexFormat::Sint32x4,
            Self::UInt => VertexFormat::Uint32,
            Self::UInt2 => VertexFormat::Uint32x2,
            Self::UInt3 => VertexFormat::Uint32x3,
            Self::UInt4 => VertexFormat::Uint32x4,
            Self::Half2 => VertexFormat::Float16x2,
            Self::Half4 => VertexFormat::Float16x4,
            Self::UChar4Norm => VertexFormat::Unorm8x4,
            Self::Half | Self::Float2x2 | Self::Float3x3 | Self::Float4x4 => return None,
        })
    }
}

// ---------------------------------------------------------------------------
// Vertex formats
// ---------------------------------------------------------------------------

/// Formats understood by the fixed-function vertex fetch stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Sint32,
    Sint32x2,
    Sint32x3,
    Sint32x4,
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
    Float16x2,
    Float16x4,
    Unorm8x4,
}

/// One attribute of a [`VertexLayout`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexAttribute {
    pub name: String,
    pub format: VertexFormat,
    pub offset: u32,
    /// Shader input location (declaration order).
    pub location: u32,
}

/// Per-vertex buffer layout consumed by a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexLayout {
    /// A layout with no vertex buffer (e.g. full-screen passes).
    pub fn empty() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// LayoutDescriptor
// ---------------------------------------------------------------------------

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayoutElement {
    pub name: String,
    pub kind: ScalarKind,
    pub size: u32,
    pub align: u32,
}

/// Ordered field declarations to be planned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LayoutDescriptor {
    elements: Vec<LayoutElement>,
}

impl LayoutDescriptor {
    /// An empty descriptor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field with the kind's natural size and block alignment.
    pub fn with(self, name: &str, kind: ScalarKind) -> Self {
        self.with_explicit(name, kind, kind.size(), kind.alignment())
    }

    /// Append a field with the kind's natural size and packed alignment.
    pub fn with_packed(self, name: &str, kind: ScalarKind) -> Self {
        self.with_explicit(name, kind, kind.size(), kind.packed_alignment())
    }

    /// Append a field with an explicit size and alignment.
    pub fn with_explicit(mut self, name: &str, kind: ScalarKind, size: u32, align: u32) -> Self {
        self.push(name, kind, size, align);
        self
    }

    /// Append a field in place.
    pub fn push(&mut self, name: &str, kind: ScalarKind, size: u32, align: u32) {
        self.elements.push(LayoutElement {
            name: name.to_owned(),
            kind,
            size,
            align,
        });
    }

    pub fn elements(&self) -> &[LayoutElement] {
        &self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Plan with the default planner.
    pub fn plan(&self) -> Result<ComputedLayout, LayoutError> {
        LayoutPlanner::new().plan(self)
    }
}

// ---------------------------------------------------------------------------
// ComputedLayout
// ---------------------------------------------------------------------------

/// A planned field: its declaration plus the assigned byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldLayout {
    pub name: String,
    pub kind: ScalarKind,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

impl FieldLayout {
    /// One past the last byte of the field. Saturates for hand-built
    /// fields; planned fields always fit.
    pub fn end(&self) -> u32 {
        self.offset.saturating_add(self.size)
    }
}

/// Offsets and stride produced by [`LayoutPlanner::plan`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputedLayout {
    fields: Vec<FieldLayout>,
    stride: u32,
    max_align: u32,
}

impl ComputedLayout {
    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldLayout] {
        &self.fields
    }

    /// Bytes between consecutive records. Zero for an empty layout.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Largest alignment the stride was rounded to.
    pub fn max_alignment(&self) -> u32 {
        self.max_align
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn offset_of(&self, name: &str) -> Option<u32> {
        self.field(name).map(|f| f.offset)
    }

    /// Bytes needed for `count` records, saturating at `u64::MAX`.
    pub fn buffer_size(&self, count: usize) -> u64 {
        u64::from(self.stride).saturating_mul(count as u64)
    }

    /// Convert to a vertex buffer layout, one attribute per field with
    /// shader locations in declaration order.
    pub fn vertex_layout(&self) -> Result<VertexLayout, LayoutError> {
        let attributes = self
            .fields
            .iter()
            .enumerate()
            .map(|(location, f)| {
                let format = f.kind.vertex_format().ok_or_else(|| LayoutError::NotAVertexAttribute {
                    field: f.name.clone(),
                    kind: f.kind,
                })?;
                Ok(VertexAttribute {
                    name: f.name.clone(),
                    format,
                    offset: f.offset,
                    location: location as u32,
                })
            })
            .collect::<Result<Vec<_>, LayoutError>>()?;
        Ok(VertexLayout {
            stride: self.stride,
            attributes,
        })
    }
}

// ---------------------------------------------------------------------------
// LayoutPlanner
// ---------------------------------------------------------------------------

#[inline]
fn round_up(value: u32, align: u32) -> Option<u32> {
    value.div_ceil(align).checked_mul(align)
}

/// Computes [`ComputedLayout`]s.
///
/// `min_stride_alignment` raises the alignment the stride is rounded to; the
/// default of 1 leaves the largest field alignment in charge. Uniform blocks
/// use [`LayoutPlanner::uniform`] (16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutPlanner {
    min_stride_alignment: u32,
}

impl Default for LayoutPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutPlanner {
    pub fn new() -> Self {
        Self {
            min_stride_alignment: 1,
        }
    }

    /// Planner for uniform parameter blocks, whose size must be a multiple
    /// of 16 bytes.
    pub fn uniform() -> Self {
        Self {
            min_stride_alignment: 16,
        }
    }

    /// Planner with a custom minimum stride alignment (a power of two).
    pub fn with_min_stride_alignment(align: u32) -> Result<Self, LayoutError> {
        if align == 0 || !align.is_power_of_two() {
            return Err(LayoutError::InvalidAlignment {
                field: "<stride>".to_owned(),
                align,
            });
        }
        Ok(Self {
            min_stride_alignment: align,
        })
    }

    /// Assign offsets and stride.
    ///
    /// An empty descriptor yields stride 0 regardless of the minimum stride
    /// alignment.
    pub fn plan(&self, descriptor: &LayoutDescriptor) -> Result<ComputedLayout, LayoutError> {
        let mut fields = Vec::with_capacity(descriptor.len());
        let mut running = 0u32;
        let mut max_align = 1u32;

        for element in descriptor.elements() {
            if element.align == 0 || !element.align.is_power_of_two() {
                return Err(LayoutError::InvalidAlignment {
                    field: element.name.clone(),
                    align: element.align,
                });
            }
            if element.size < element.kind.size() {
                return Err(LayoutError::SizeTooSmall {
                    field: element.name.clone(),
                    kind: element.kind,
                    size: element.size,
                    required: element.kind.size(),
                });
            }
            if fields.iter().any(|f: &FieldLayout| f.name == element.name) {
                return Err(LayoutError::DuplicateField(element.name.clone()));
            }

            let overflow = || LayoutError::Overflow {
                field: element.name.clone(),
            };
            let offset = round_up(running, element.align).ok_or_else(overflow)?;
            running = offset.checked_add(element.size).ok_or_else(overflow)?;
            max_align = max_align.max(element.align);
            fields.push(FieldLayout {
                name: element.name.clone(),
                kind: element.kind,
                offset,
                size: element.size,
                align: element.align,
            });
        }

        if fields.is_empty() {
            return Ok(ComputedLayout {
                fields,
                stride: 0,
                max_align: 1,
            });
        }

        let stride_align = max_align.max(self.min_stride_alignment);
        let stride = round_up(running, stride_align).ok_or_else(|| LayoutError::Overflow {
            field: "<stride>".to_owned(),
        })?;
        Ok(ComputedLayout {
            fields,
            stride,
            max_align: stride_align,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
