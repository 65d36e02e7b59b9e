// SPDX-License-Identifier: MIT
//! Decode strategies for positioned views over a finished buffer
//!
//! A strategy says how to turn "the value at absolute position `loc`" into a
//! Rust value: read a scalar in place, follow a forward offset, decode a
//! string, a struct, a table or a vector. Strategies compose, so
//! `ForwardsUOffset<Vector<'a, ForwardsUOffset<&'a str>>>` reads a field that
//! refers to a vector of strings. Nothing is copied: strings, byte strings
//! and vectors alias the source buffer.

use std::marker::PhantomData;

use crate::error::ReadError;
use crate::format::{follow_uoffset, read_scalar, slice_at, Struct, UOffset, SIZE_UOFFSET};

/// Decode the value located at an absolute buffer position
pub trait Follow<'a> {
    type Inner;

    fn follow(buf: &'a [u8], loc: usize) -> Result<Self::Inner, ReadError>;
}

/// Strategy for values stored inline in a table slot or vector element
pub trait Inline<'a>: Follow<'a> {
    /// Bytes occupied inline; also the vector element stride.
    const SIZE: usize;
}

macro_rules! impl_follow_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl<'a> Follow<'a> for $ty {
                type Inner = $ty;

                #[inline]
                fn follow(buf: &'a [u8], loc: usize) -> Result<Self::Inner, ReadError> {
                    read_scalar::<$ty>(buf, loc)
                }
            }

            impl<'a> Inline<'a> for $ty {
                const SIZE: usize = <$ty as crate::format::Scalar>::SIZE;
            }
        )*
    };
}

impl_follow_scalar!(bool, u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Offset-indirected strategy: an unsigned forward offset stored inline,
/// pointing at a `T` written elsewhere in the buffer
#[derive(Debug)]
pub struct ForwardsUOffset<T>(PhantomData<T>);

impl<'a, T: Follow<'a>> Follow<'a> for ForwardsUOffset<T> {
    type Inner = T::Inner;

    #[inline]
    fn follow(buf: &'a [u8], loc: usize) -> Result<Self::Inner, ReadError> {
        let target = follow_uoffset(buf, loc)?;
        T::follow(buf, target)
    }
}

impl<'a, T: Follow<'a>> Inline<'a> for ForwardsUOffset<T> {
    const SIZE: usize = SIZE_UOFFSET;
}

/// Inline struct strategy
#[derive(Debug)]
pub struct Fixed<S>(PhantomData<S>);

impl<'a, S: Struct> Follow<'a> for Fixed<S> {
    type Inner = S;

    #[inline]
    fn follow(buf: &'a [u8], loc: usize) -> Result<Self::Inner, ReadError> {
        slice_at(buf, loc, S::SIZE).map(S::decode)
    }
}

impl<'a, S: Struct> Inline<'a> for Fixed<S> {
    const SIZE: usize = S::SIZE;
}

/// Length-prefixed, zero-terminated byte string
impl<'a> Follow<'a> for &'a [u8] {
    type Inner = &'a [u8];

    fn follow(buf: &'a [u8], loc: usize) -> Result<Self::Inner, ReadError> {
        let len = read_scalar::<UOffset>(buf, loc)? as usize;
        let start = loc + SIZE_UOFFSET;
        let with_terminator = len.checked_add(1).ok_or(ReadError::OutOfBounds {
            position: start,
            size: len,
            buffer_len: buf.len(),
        })?;
        let bytes = slice_at(buf, start, with_terminator)?;
        if bytes[len] != 0 {
            return Err(ReadError::MissingTerminator { position: loc });
        }
        Ok(&bytes[..len])
    }
}

/// UTF-8 string
impl<'a> Follow<'a> for &'a str {
    type Inner = &'a str;

    fn follow(buf: &'a [u8], loc: usize) -> Result<Self::Inner, ReadError> {
        let bytes = <&'a [u8]>::follow(buf, loc)?;
        std::str::from_utf8(bytes).map_err(|_| ReadError::InvalidUtf8 { position: loc })
    }
}
