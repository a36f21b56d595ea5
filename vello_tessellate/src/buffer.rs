// Copyright 2025 the Vello Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Vertex and indirect buffer allocation.
//!
//! Writers request memory through the [`VertexAllocator`] trait. A request either succeeds in
//! full or fails; there are no partial grants.

use bytemuck::Pod;

use crate::{Error, Result};

/// Source of GPU-bound memory for one draw.
pub trait VertexAllocator {
    /// Allocates `count` vertex or instance records of `stride` bytes each.
    ///
    /// `stride` must be a multiple of 4.
    fn alloc_vertices(&mut self, stride: usize, count: usize) -> Option<VertexChunk>;

    /// Allocates `count` indirect draw commands of `stride` bytes each.
    fn alloc_indirect(&mut self, stride: usize, count: usize) -> Option<VertexChunk>;
}

/// A zero-initialized run of fixed-stride records.
///
/// The storage is 4-byte aligned so it can be viewed as any record type built from `f32`s and
/// `u32`s.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexChunk {
    words: Vec<u32>,
    stride: usize,
    base: u32,
    count: usize,
}

impl VertexChunk {
    /// Creates a chunk that starts at record `base` of the underlying buffer.
    pub fn new(stride: usize, base: u32, count: usize) -> Self {
        debug_assert_eq!(stride % 4, 0, "record strides must be a multiple of 4 bytes");
        Self {
            words: vec![0; stride / 4 * count],
            stride,
            base,
            count,
        }
    }

    /// Size of each record in bytes.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Index of the first record in the underlying buffer, in units of the stride.
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    /// Views the chunk as records of type `T`, or `None` if `T` does not match the stride.
    pub fn records<T: Pod>(&self) -> Option<&[T]> {
        if size_of::<T>() != self.stride {
            return None;
        }
        bytemuck::try_cast_slice(&self.words).ok()
    }

    /// Writes `value` at the start of record `index`.
    ///
    /// Returns false, leaving the chunk untouched, if the value does not fit.
    pub fn write<T: Pod>(&mut self, index: usize, value: &T) -> bool {
        let bytes = bytemuck::bytes_of(value);
        let start = index * self.stride;
        if index >= self.count || bytes.len() > self.stride {
            return false;
        }
        let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        dst[start..start + bytes.len()].copy_from_slice(bytes);
        true
    }

    /// Returns a writer that appends values from the start of the chunk.
    pub fn writer(&mut self) -> VertexWriter<'_> {
        VertexWriter {
            dst: bytemuck::cast_slice_mut(&mut self.words),
            cursor: 0,
        }
    }
}

/// Appends [`Pod`] values to a [`VertexChunk`].
///
/// Values are packed back to back, so a record can be written as several values.
pub struct VertexWriter<'a> {
    dst: &'a mut [u8],
    cursor: usize,
}

impl VertexWriter<'_> {
    /// Appends `value`. Returns false if the chunk is full.
    pub fn write<T: Pod>(&mut self, value: &T) -> bool {
        let bytes = bytemuck::bytes_of(value);
        let Some(dst) = self.dst.get_mut(self.cursor..self.cursor + bytes.len()) else {
            debug_assert!(false, "wrote past the end of a vertex chunk");
            return false;
        };
        dst.copy_from_slice(bytes);
        self.cursor += bytes.len();
        true
    }

    /// Number of bytes written so far.
    pub fn bytes_written(&self) -> usize {
        self.cursor
    }
}

/// A [`VertexChunk`] and the number of records written to it.
#[derive(Clone, Debug, PartialEq)]
pub struct FilledChunk {
    pub chunk: VertexChunk,
    pub count: usize,
}

impl FilledChunk {
    /// Views the written records as type `T`, or `None` if `T` does not match the stride.
    pub fn records<T: Pod>(&self) -> Option<&[T]> {
        self.chunk.records().map(|records| &records[..self.count])
    }
}

/// Appends fixed-stride records to a growing list of [`VertexChunk`]s.
///
/// Used when the number of records is only estimated up front. The first chunk holds the
/// estimate, and every chunk after it is twice the size of the one before.
pub struct VertexChunkBuilder<'a, A: VertexAllocator + ?Sized> {
    alloc: &'a mut A,
    stride: usize,
    min_records_per_chunk: usize,
    chunks: Vec<FilledChunk>,
    failed_count: Option<usize>,
}

impl<'a, A: VertexAllocator + ?Sized> VertexChunkBuilder<'a, A> {
    pub fn new(alloc: &'a mut A, stride: usize, prealloc_count: usize) -> Self {
        Self {
            alloc,
            stride,
            min_records_per_chunk: prealloc_count.max(1),
            chunks: Vec::new(),
            failed_count: None,
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Whether an allocation has failed. Once it has, appends are dropped.
    pub fn failed(&self) -> bool {
        self.failed_count.is_some()
    }

    /// Appends one record. Returns false if it was dropped.
    pub fn append<T: Pod>(&mut self, record: &T) -> bool {
        debug_assert_eq!(size_of::<T>(), self.stride);
        if self.failed() {
            return false;
        }
        let needs_chunk = self
            .chunks
            .last()
            .is_none_or(|last| last.count == last.chunk.count());
        if needs_chunk {
            let count = self.min_records_per_chunk;
            let Some(chunk) = self.alloc.alloc_vertices(self.stride, count) else {
                self.failed_count = Some(count);
                return false;
            };
            self.chunks.push(FilledChunk { chunk, count: 0 });
            self.min_records_per_chunk = count.saturating_mul(2);
        }
        let Some(last) = self.chunks.last_mut() else {
            return false;
        };
        let written = last.chunk.write(last.count, record);
        last.count += usize::from(written);
        written
    }

    /// Total number of records appended.
    pub fn record_count(&self) -> usize {
        self.chunks.iter().map(|c| c.count).sum()
    }

    /// Returns the written chunks, or [`Error::AllocationFailed`] if any allocation failed.
    pub fn finish(self) -> Result<Vec<FilledChunk>> {
        match self.failed_count {
            Some(count) => Err(Error::AllocationFailed {
                stride: self.stride,
                count,
            }),
            None => Ok(self.chunks),
        }
    }
}

/// Memory usage of a [`BumpAllocator`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BumpUsage {
    pub vertex_bytes: usize,
    pub indirect_bytes: usize,
}

impl std::fmt::Display for BumpUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vertex: {} bytes ({:.2} KB), indirect: {} bytes ({:.2} KB)",
            self.vertex_bytes,
            self.vertex_bytes as f32 / (1 << 10) as f32,
            self.indirect_bytes,
            self.indirect_bytes as f32 / (1 << 10) as f32,
        )
    }
}

/// A [`VertexAllocator`] that hands out consecutive ranges of two fixed-size arenas.
///
/// Each arena holds `capacity` bytes. Allocations are aligned to their stride so that the
/// returned base index addresses the first record. Once a request fails, the allocator stays
/// failed until [`BumpAllocator::reset`].
#[derive(Clone, Debug)]
pub struct BumpAllocator {
    capacity: usize,
    usage: BumpUsage,
    failed: bool,
}

impl BumpAllocator {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            usage: BumpUsage::default(),
            failed: false,
        }
    }

    /// Whether any allocation has failed since the last reset.
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn usage(&self) -> BumpUsage {
        self.usage
    }

    /// Releases everything for the next draw.
    pub fn reset(&mut self) {
        self.usage = BumpUsage::default();
        self.failed = false;
    }

    fn bump(
        capacity: usize,
        used: &mut usize,
        failed: &mut bool,
        stride: usize,
        count: usize,
    ) -> Option<VertexChunk> {
        if *failed || stride == 0 || stride % 4 != 0 {
            *failed = true;
            return None;
        }
        let base = used.div_ceil(stride);
        let end = stride
            .checked_mul(count)
            .and_then(|size| size.checked_add(base * stride))
            .filter(|&end| end <= capacity);
        let (Some(end), Ok(base)) = (end, u32::try_from(base)) else {
            log::warn!(
                "Vertex allocation of {count} records of {stride} bytes failed \
                ({used} of {capacity} bytes in use)"
            );
            *failed = true;
            return None;
        };
        *used = end;
        Some(VertexChunk::new(stride, base, count))
    }
}

impl VertexAllocator for BumpAllocator {
    fn alloc_vertices(&mut self, stride: usize, count: usize) -> Option<VertexChunk> {
        Self::bump(
            self.capacity,
            &mut self.usage.vertex_bytes,
            &mut self.failed,
            stride,
            count,
        )
    }

    fn alloc_indirect(&mut self, stride: usize, count: usize) -> Option<VertexChunk> {
        Self::bump(
            self.capacity,
            &mut self.usage.indirect_bytes,
            &mut self.failed,
            stride,
            count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{BumpAllocator, VertexAllocator, VertexChunk, VertexChunkBuilder};
    use crate::Error;

    #[test]
    fn allocations_are_stride_aligned() {
        let mut alloc = BumpAllocator::new(1024);
        let a = alloc.alloc_vertices(12, 3).unwrap();
        assert_eq!(a.base(), 0);
        let b = alloc.alloc_vertices(8, 2).unwrap();
        // 36 bytes in use rounds up to record 5 at stride 8.
        assert_eq!(b.base(), 5);
        assert_eq!(alloc.usage().vertex_bytes, 56);
        assert_eq!(alloc.usage().indirect_bytes, 0);
    }

    #[test]
    fn failure_is_sticky() {
        let mut alloc = BumpAllocator::new(64);
        assert!(alloc.alloc_vertices(16, 8).is_none());
        assert!(alloc.failed());
        assert!(alloc.alloc_vertices(4, 1).is_none());
        alloc.reset();
        assert!(alloc.alloc_vertices(16, 4).is_some());
        assert!(!alloc.failed());
    }

    #[test]
    fn chunk_writes_are_bounded() {
        let mut chunk = VertexChunk::new(8, 0, 2);
        assert!(chunk.write(1, &[1.0_f32, 2.0]));
        assert!(!chunk.write(2, &[3.0_f32, 4.0]));
        assert!(!chunk.write(0, &[0_u32; 3]));
        assert_eq!(chunk.records::<[f32; 2]>().unwrap(), &[[0.0, 0.0], [1.0, 2.0]]);
        assert!(chunk.records::<[f32; 3]>().is_none());
    }

    #[test]
    fn writer_appends() {
        let mut chunk = VertexChunk::new(12, 0, 1);
        let mut writer = chunk.writer();
        assert!(writer.write(&[1_u32, 2]));
        assert!(writer.write(&3_u32));
        assert_eq!(writer.bytes_written(), 12);
        assert_eq!(chunk.records::<[u32; 3]>().unwrap(), &[[1, 2, 3]]);
    }

    #[test]
    fn chunk_builder_grows_and_fails() {
        let mut alloc = BumpAllocator::new(8 * 7);
        let mut builder = VertexChunkBuilder::new(&mut alloc, 8, 2);
        for i in 0..5_u32 {
            assert!(builder.append(&[i, i]), "{i}");
        }
        // Chunks of 2 and 4 records fit, the next chunk of 8 does not.
        assert!(builder.append(&[5_u32, 5]));
        assert!(!builder.append(&[6_u32, 6]));
        assert!(builder.failed());
        assert_eq!(builder.record_count(), 6);
        assert_eq!(
            builder.finish(),
            Err(Error::AllocationFailed {
                stride: 8,
                count: 8
            })
        );

        let mut alloc = BumpAllocator::new(1024);
        let mut builder = VertexChunkBuilder::new(&mut alloc, 4, 2);
        for i in 0..3_u32 {
            builder.append(&i);
        }
        let chunks = builder.finish().unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].records::<u32>().unwrap(), &[0, 1]);
        assert_eq!(chunks[1].records::<u32>().unwrap(), &[2]);
        assert_eq!(chunks[1].chunk.base(), 2);
    }
}
