// SPDX-License-Identifier: MIT
//! Back-to-front growable byte buffer
//!
//! Bytes are written from the high end toward the low end. Positions handed
//! out while building are measured from the end of the buffer, so they stay
//! valid when the backing memory is reallocated and the content moves.

use tracing::trace;

use crate::error::WriteError;
use crate::format::Scalar;

#[derive(Debug, Clone)]
pub struct Buffer {
    /// Backing storage; written content is `bytes[head..]`.
    bytes: Vec<u8>,
    head: usize,
    max_size: usize,
}

impl Buffer {
    /// Create an empty buffer with `capacity` bytes of head-room
    pub fn with_capacity(capacity: usize, max_size: usize) -> Self {
        let capacity = capacity.min(max_size);
        Self {
            bytes: vec![0u8; capacity],
            head: capacity,
            max_size,
        }
    }

    /// Bytes written so far. Basis for every offset computed while building.
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.bytes.len() - self.head
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Make room for `additional` more bytes, doubling capacity as needed
    pub fn reserve(&mut self, additional: usize) -> Result<(), WriteError> {
        if self.head >= additional {
            return Ok(());
        }

        let used = self.current_offset();
        let needed = used
            .checked_add(additional)
            .filter(|&n| n <= self.max_size)
            .ok_or(WriteError::BufferTooLarge {
                requested: used.saturating_add(additional),
                max: self.max_size,
            })?;

        let mut new_capacity = self.bytes.len().max(64);
        while new_capacity < needed {
            new_capacity = new_capacity.saturating_mul(2);
        }
        let new_capacity = new_capacity.min(self.max_size);

        trace!(
            from = self.bytes.len(),
            to = new_capacity,
            used,
            "growing buffer"
        );

        let mut grown = vec![0u8; new_capacity];
        grown[new_capacity - used..].copy_from_slice(&self.bytes[self.head..]);
        self.bytes = grown;
        self.head = new_capacity - used;
        Ok(())
    }

    /// Write `n` zero bytes
    pub fn pad(&mut self, n: usize) -> Result<(), WriteError> {
        self.reserve(n)?;
        self.head -= n;
        self.bytes[self.head..self.head + n].fill(0);
        Ok(())
    }

    /// Write a scalar immediately before the current content
    #[inline]
    pub fn place<T: Scalar>(&mut self, value: T) -> Result<(), WriteError> {
        self.reserve(T::SIZE)?;
        self.head -= T::SIZE;
        value.write_le(&mut self.bytes[self.head..]);
        Ok(())
    }

    /// Write raw bytes immediately before the current content
    pub fn place_bytes(&mut self, src: &[u8]) -> Result<(), WriteError> {
        self.reserve(src.len())?;
        self.head -= src.len();
        self.bytes[self.head..self.head + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Reserve `len` bytes and hand them out for in-place encoding
    pub fn place_with<F>(&mut self, len: usize, encode: F) -> Result<(), WriteError>
    where
        F: FnOnce(&mut [u8]),
    {
        self.pad(len)?;
        encode(&mut self.bytes[self.head..self.head + len]);
        Ok(())
    }

    /// Overwrite a scalar previously written at `offset` (measured from the end)
    pub fn write_scalar_at<T: Scalar>(&mut self, offset: usize, value: T) {
        debug_assert!(offset >= T::SIZE && offset <= self.current_offset());
        let pos = self.bytes.len() - offset;
        value.write_le(&mut self.bytes[pos..pos + T::SIZE]);
    }

    /// Written content, lowest address first
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.bytes[self.head..]
    }

    /// Drop all content, keeping the allocation
    pub fn clear(&mut self) {
        self.head = self.bytes.len();
    }

    /// Hand the written content over as an owned vector
    pub fn into_vec(mut self) -> Vec<u8> {
        self.bytes.drain(..self.head);
        self.bytes
    }
}
