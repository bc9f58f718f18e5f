// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Byte conversion for grain keys, messages, and replies.
//!
//! Anything which crosses a node boundary is converted with [BytesConvertable].
//! Integer types use their big-endian representation so that the same key
//! hashes identically on every node. Composite values are built from
//! length-prefixed chunks, see [pack_chunks] and [unpack_chunks].

use crate::SerializationErr;

/// Conversion of a value to and from raw bytes
pub trait BytesConvertable: Sized {
    /// Serialize this value to bytes
    fn into_bytes(self) -> Vec<u8>;
    /// Deserialize a value from bytes
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr>;
}

macro_rules! implement_numeric {
    {$ty: ty} => {
        impl BytesConvertable for $ty {
            fn into_bytes(self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }
            fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
                let data: [u8; std::mem::size_of::<$ty>()] = bytes.try_into().map_err(|raw: Vec<u8>| {
                    SerializationErr::new(
                        std::any::type_name::<$ty>(),
                        format!("expected {} bytes, got {}", std::mem::size_of::<$ty>(), raw.len()),
                    )
                })?;
                Ok(<$ty>::from_be_bytes(data))
            }
        }
    };
}

implement_numeric! {i8}
implement_numeric! {i16}
implement_numeric! {i32}
implement_numeric! {i64}
implement_numeric! {i128}
implement_numeric! {u8}
implement_numeric! {u16}
implement_numeric! {u32}
implement_numeric! {u64}
implement_numeric! {u128}
implement_numeric! {f32}
implement_numeric! {f64}

impl BytesConvertable for () {
    fn into_bytes(self) -> Vec<u8> {
        Vec::new()
    }
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        if bytes.is_empty() {
            Ok(())
        } else {
            Err(SerializationErr::new("()", "unexpected trailing bytes"))
        }
    }
}

impl BytesConvertable for bool {
    fn into_bytes(self) -> Vec<u8> {
        vec![u8::from(self)]
    }
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        match bytes.as_slice() {
            [0] => Ok(false),
            [1] => Ok(true),
            _ => Err(SerializationErr::new("bool", "expected a single 0 or 1 byte")),
        }
    }
}

impl BytesConvertable for String {
    fn into_bytes(self) -> Vec<u8> {
        self.into_bytes()
    }
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        String::from_utf8(bytes).map_err(|err| SerializationErr::new("String", err.to_string()))
    }
}

impl<T: BytesConvertable> BytesConvertable for Vec<T> {
    fn into_bytes(self) -> Vec<u8> {
        pack_chunks(self.into_iter().map(T::into_bytes))
    }
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        unpack_chunks(bytes)?
            .into_iter()
            .map(T::from_bytes)
            .collect()
    }
}

impl<T: BytesConvertable> BytesConvertable for Option<T> {
    fn into_bytes(self) -> Vec<u8> {
        match self {
            None => vec![0],
            Some(value) => {
                let mut data = vec![1];
                data.extend(value.into_bytes());
                data
            }
        }
    }
    fn from_bytes(mut bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        match bytes.first() {
            Some(0) if bytes.len() == 1 => Ok(None),
            Some(1) => {
                bytes.remove(0);
                T::from_bytes(bytes).map(Some)
            }
            _ => Err(SerializationErr::new(
                std::any::type_name::<Self>(),
                "invalid option tag",
            )),
        }
    }
}

impl<A: BytesConvertable, B: BytesConvertable> BytesConvertable for (A, B) {
    fn into_bytes(self) -> Vec<u8> {
        pack_chunks([self.0.into_bytes(), self.1.into_bytes()])
    }
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        let mut chunks = unpack_chunks(bytes)?.into_iter();
        match (chunks.next(), chunks.next(), chunks.next()) {
            (Some(a), Some(b), None) => Ok((A::from_bytes(a)?, B::from_bytes(b)?)),
            _ => Err(SerializationErr::new(
                std::any::type_name::<Self>(),
                "expected exactly 2 elements",
            )),
        }
    }
}

/// Concatenate chunks, each prefixed by its big-endian `u64` length
pub fn pack_chunks<I>(chunks: I) -> Vec<u8>
where
    I: IntoIterator<Item = Vec<u8>>,
{
    let mut data = Vec::new();
    for chunk in chunks {
        data.extend_from_slice(&(chunk.len() as u64).to_be_bytes());
        data.extend(chunk);
    }
    data
}

/// Split data produced by [pack_chunks] back into its chunks
pub fn unpack_chunks(bytes: Vec<u8>) -> Result<Vec<Vec<u8>>, SerializationErr> {
    const PREFIX: usize = std::mem::size_of::<u64>();

    let mut chunks = Vec::new();
    let mut at = 0usize;
    while at < bytes.len() {
        let prefix: [u8; PREFIX] = bytes
            .get(at..at + PREFIX)
            .and_then(|raw| raw.try_into().ok())
            .ok_or_else(|| SerializationErr::new("chunks", "truncated length prefix"))?;
        at += PREFIX;
        let len = u64::from_be_bytes(prefix) as usize;
        let chunk = at
            .checked_add(len)
            .and_then(|end| bytes.get(at..end))
            .ok_or_else(|| SerializationErr::new("chunks", "truncated chunk"))?;
        chunks.push(chunk.to_vec());
        at += len;
    }
    Ok(chunks)
}
