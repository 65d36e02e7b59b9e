// SPDX-License-Identifier: MIT
//! Length-prefixed vector view

use std::fmt;
use std::marker::PhantomData;

use crate::error::ReadError;
use crate::follow::{Follow, Inline};
use crate::format::{read_scalar, slice_at, UOffset, SIZE_UOFFSET};

/// Zero-copy view of a vector whose elements decode with strategy `T`
pub struct Vector<'a, T> {
    buf: &'a [u8],
    loc: usize,
    len: usize,
    _element: PhantomData<T>,
}

impl<'a, T> Clone for Vector<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> Copy for Vector<'a, T> {}

impl<'a, T> fmt::Debug for Vector<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vector")
            .field("loc", &self.loc)
            .field("len", &self.len)
            .finish()
    }
}

impl<'a, T: Inline<'a>> Vector<'a, T> {
    /// Resolve the vector at `loc`, checking that every element is in bounds
    pub fn init(buf: &'a [u8], loc: usize) -> Result<Self, ReadError> {
        let len = read_scalar::<UOffset>(buf, loc)? as usize;
        let start = loc + SIZE_UOFFSET;
        let block = len.checked_mul(T::SIZE).ok_or(ReadError::OutOfBounds {
            position: start,
            size: usize::MAX,
            buffer_len: buf.len(),
        })?;
        slice_at(buf, start, block)?;

        Ok(Self {
            buf,
            loc,
            len,
            _element: PhantomData,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute position of the length header
    pub fn location(&self) -> usize {
        self.loc
    }

    /// Element `index`, bounds-checked against the stored length
    #[inline]
    pub fn get(&self, index: usize) -> Result<T::Inner, ReadError> {
        if index >= self.len {
            return Err(ReadError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        T::follow(self.buf, self.loc + SIZE_UOFFSET + index * T::SIZE)
    }

    /// Raw element bytes, aliasing the buffer
    pub fn bytes(&self) -> &'a [u8] {
        let start = self.loc + SIZE_UOFFSET;
        &self.buf[start..start + self.len * T::SIZE]
    }

    pub fn iter(&self) -> VectorIter<'a, T> {
        VectorIter {
            vector: *self,
            front: 0,
            back: self.len,
        }
    }
}

impl<'a, T: Inline<'a>> Follow<'a> for Vector<'a, T> {
    type Inner = Vector<'a, T>;

    #[inline]
    fn follow(buf: &'a [u8], loc: usize) -> Result<Self::Inner, ReadError> {
        Vector::init(buf, loc)
    }
}

/// Lazily decodes elements; nothing is read until the caller advances
pub struct VectorIter<'a, T> {
    vector: Vector<'a, T>,
    front: usize,
    back: usize,
}

impl<'a, T: Inline<'a>> Iterator for VectorIter<'a, T> {
    type Item = Result<T::Inner, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        let item = self.vector.get(self.front);
        self.front += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl<'a, T: Inline<'a>> DoubleEndedIterator for VectorIter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        Some(self.vector.get(self.back))
    }
}

impl<'a, T: Inline<'a>> ExactSizeIterator for VectorIter<'a, T> {}

impl<'a, T: Inline<'a>> IntoIterator for Vector<'a, T> {
    type Item = Result<T::Inner, ReadError>;
    type IntoIter = VectorIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::follow::ForwardsUOffset;
    use crate::{root_as_table, Builder};

    #[test]
    fn test_reverse_push_yields_forward_order() {
        let mut builder = Builder::new();
        builder.start_vector(4, 3, 4).unwrap();
        // c, b, a written back-to-front
        builder.push_element(30u32).unwrap();
        builder.push_element(20u32).unwrap();
        builder.push_element(10u32).unwrap();
        let numbers = builder.end_vector(3).unwrap();

        builder.start_table(1).unwrap();
        builder.add_offset_field(0, numbers).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();

        let data = builder.finished_data().unwrap();
        let vector = root_as_table(data)
            .unwrap()
            .get_vector::<u32>(0)
            .unwrap()
            .unwrap();
        assert_eq!(vector.len(), 3);
        assert_eq!(vector.get(0).unwrap(), 10);
        assert_eq!(vector.get(1).unwrap(), 20);
        assert_eq!(vector.get(2).unwrap(), 30);
        assert_eq!(
            vector.get(3),
            Err(ReadError::IndexOutOfRange { index: 3, len: 3 })
        );
    }

    #[test]
    fn test_iteration_both_ends() {
        let mut builder = Builder::new();
        let values = builder.create_vector(&[1i16, -2, 3, -4]).unwrap();
        builder.start_table(1).unwrap();
        builder.add_offset_field(0, values).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();

        let data = builder.finished_data().unwrap();
        let vector = root_as_table(data)
            .unwrap()
            .get_vector::<i16>(0)
            .unwrap()
            .unwrap();
        let forward: Vec<i16> = vector.iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(forward, vec![1, -2, 3, -4]);
        let backward: Vec<i16> = vector.iter().rev().collect::<Result<_, _>>().unwrap();
        assert_eq!(backward, vec![-4, 3, -2, 1]);
        assert_eq!(vector.iter().len(), 4);
    }

    #[test]
    fn test_vector_of_strings() {
        let mut builder = Builder::new();
        let names = builder
            .create_vector_of_strings(&["alpha", "beta", ""])
            .unwrap();
        builder.start_table(1).unwrap();
        builder.add_offset_field(0, names).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();

        let data = builder.finished_data().unwrap();
        let names = root_as_table(data)
            .unwrap()
            .get_vector::<ForwardsUOffset<&str>>(0)
            .unwrap()
            .unwrap();
        let collected: Vec<&str> = names.into_iter().collect::<Result<_, _>>().unwrap();
        assert_eq!(collected, vec!["alpha", "beta", ""]);
    }

    #[test]
    fn test_byte_vector_aliases_buffer() {
        let mut builder = Builder::new();
        let blob = builder.create_vector(&[9u8, 8, 7]).unwrap();
        builder.start_table(1).unwrap();
        builder.add_offset_field(0, blob).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();

        let data = builder.finished_data().unwrap();
        let blob = root_as_table(data)
            .unwrap()
            .get_vector::<u8>(0)
            .unwrap()
            .unwrap();
        assert_eq!(blob.bytes(), &[9, 8, 7]);
        let start = blob.location() + 4;
        assert_eq!(blob.bytes().as_ptr(), data[start..].as_ptr());
    }

    #[test]
    fn test_length_past_end_rejected() {
        let buf = [200u8, 0, 0, 0, 1, 2, 3, 4];
        assert!(matches!(
            Vector::<u32>::init(&buf, 0),
            Err(ReadError::OutOfBounds { .. })
        ));
        let huge = [0xffu8, 0xff, 0xff, 0xff];
        assert!(Vector::<u64>::init(&huge, 0).is_err());
    }

    #[test]
    fn test_empty_vector() {
        let mut builder = Builder::new();
        let empty = builder.create_vector::<u64>(&[]).unwrap();
        builder.start_table(1).unwrap();
        builder.add_offset_field(0, empty).unwrap();
        let root = builder.end_table().unwrap();
        builder.finish(root).unwrap();

        let data = builder.finished_data().unwrap();
        let vector = root_as_table(data)
            .unwrap()
            .get_vector::<u64>(0)
            .unwrap()
            .unwrap();
        assert!(vector.is_empty());
        assert_eq!(vector.iter().next(), None);
    }
}
