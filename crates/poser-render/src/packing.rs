//! Writing values into raw bytes according to a [`ComputedLayout`].
//!
//! [`ParameterBlock`] holds one record (e.g. a uniform block),
//! [`VertexPacker`] holds `count` records back to back. Both write through a
//! [`RecordWriter`], which places `bytemuck::Pod` values at their field's
//! offset. [`pack_selection`] fills one record per entity of a registry
//! selection.

use bytemuck::Pod;
use poser_ecs::query::{ComponentSet, EntityQuery};
use poser_ecs::Registry;

use crate::layout::{ComputedLayout, LayoutError};

// ---------------------------------------------------------------------------
// RecordWriter
// ---------------------------------------------------------------------------

/// Writes fields of a single record.
pub struct RecordWriter<'a> {
    layout: &'a ComputedLayout,
    bytes: &'a mut [u8],
}

impl<'a> RecordWriter<'a> {
    /// `bytes` must be exactly one stride long.
    fn new(layout: &'a ComputedLayout, bytes: &'a mut [u8]) -> Self {
        debug_assert_eq!(bytes.len(), layout.stride() as usize);
        Self { layout, bytes }
    }

    /// Write `value` at the offset of `name`. The value may be smaller than
    /// the field; trailing field bytes are left as they are.
    pub fn set<T: Pod>(&mut self, name: &str, value: T) -> Result<(), LayoutError> {
        self.set_bytes(name, bytemuck::bytes_of(&value))
    }

    /// Write raw bytes at the offset of `name`.
    pub fn set_bytes(&mut self, name: &str, value: &[u8]) -> Result<(), LayoutError> {
        let field = self
            .layout
            .field(name)
            .ok_or_else(|| LayoutError::UnknownField(name.to_owned()))?;
        if value.len() > field.size as usize {
            return Err(LayoutError::ValueTooLarge {
                field: name.to_owned(),
                value_size: value.len(),
                field_size: field.size,
            });
        }
        let start = field.offset as usize;
        self.bytes[start..start + value.len()].copy_from_slice(value);
        Ok(())
    }
}

fn read_field<T: Pod>(layout: &ComputedLayout, record: &[u8], name: &str) -> Option<T> {
    let field = layout.field(name)?;
    let len = std::mem::size_of::<T>();
    if len > field.size as usize {
        return None;
    }
    let start = field.offset as usize;
    Some(bytemuck::pod_read_unaligned(&record[start..start + len]))
}

// ---------------------------------------------------------------------------
// ParameterBlock
// ---------------------------------------------------------------------------

/// One zero-initialized record, e.g. a uniform or material block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBlock {
    layout: ComputedLayout,
    bytes: Vec<u8>,
}

impl ParameterBlock {
    pub fn new(layout: &ComputedLayout) -> Self {
        Self {
            layout: layout.clone(),
            bytes: vec![0u8; layout.stride() as usize],
        }
    }

    pub fn layout(&self) -> &ComputedLayout {
        &self.layout
    }

    pub fn set<T: Pod>(&mut self, name: &str, value: T) -> Result<(), LayoutError> {
        RecordWriter::new(&self.layout, &mut self.bytes).set(name, value)
    }

    /// Read a field back. `None` if the field is unknown or smaller than `T`.
    pub fn get<T: Pod>(&self, name: &str) -> Option<T> {
        read_field(&self.layout, &self.bytes, name)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// ---------------------------------------------------------------------------
// VertexPacker
// ---------------------------------------------------------------------------

/// `count` zero-initialized records laid out at `stride` intervals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexPacker {
    layout: ComputedLayout,
    count: usize,
    bytes: Vec<u8>,
}

impl VertexPacker {
    pub fn new(layout: &ComputedLayout, count: usize) -> Self {
        Self {
            layout: layout.clone(),
            count,
            bytes: vec![0u8; layout.buffer_size(count) as usize],
        }
    }

    pub fn layout(&self) -> &ComputedLayout {
        &self.layout
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Writer for record `index`.
    pub fn record(&mut self, index: usize) -> Result<RecordWriter<'_>, LayoutError> {
        if index >= self.count {
            return Err(LayoutError::IndexOutOfRange {
                index,
                count: self.count,
            });
        }
        let stride = self.layout.stride() as usize;
        let start = index * stride;
        Ok(RecordWriter::new(&self.layout, &mut self.bytes[start..start + stride]))
    }

    pub fn write<T: Pod>(&mut self, index: usize, name: &str, value: T) -> Result<(), LayoutError> {
        self.record(index)?.set(name, value)
    }

    pub fn read<T: Pod>(&self, index: usize, name: &str) -> Option<T> {
        if index >= self.count {
            return None;
        }
        let stride = self.layout.stride() as usize;
        read_field(&self.layout, &self.bytes[index * stride..(index + 1) * stride], name)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

// ---------------------------------------------------------------------------
// Selection packing
// ---------------------------------------------------------------------------

/// Pack one record per entity selected by `query`, in selection order.
///
/// `write` receives the record writer and the entity's components.
pub fn pack_selection<'r, Q, F>(
    registry: &'r Registry,
    query: &mut EntityQuery<Q>,
    layout: &ComputedLayout,
    mut write: F,
) -> Result<VertexPacker, LayoutError>
where
    Q: ComponentSet,
    F: FnMut(&mut RecordWriter<'_>, Q::Item<'r>) -> Result<(), LayoutError>,
{
    let items: Vec<_> = query.iter(registry).map(|(_, item)| item).collect();
    let mut packer = VertexPacker::new(layout, items.len());
    for (index, item) in items.into_iter().enumerate() {
        write(&mut packer.record(index)?, item)?;
    }
    Ok(packer)
}
