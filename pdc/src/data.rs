/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Element types and conversions between typed values and the
//! little-endian byte buffers moved by transfers.

use std::fmt;

use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::query::Scalar;

/// The element type of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
}

impl DataType {
    /// Size of one element, in bytes.
    pub fn size(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float => 4,
            DataType::Int64 | DataType::UInt64 | DataType::Double => 8,
        }
    }

    /// Decode one element. `bytes` must be exactly [`DataType::size`]
    /// bytes long.
    pub fn scalar(self, bytes: &[u8]) -> Result<Scalar> {
        Ok(match self {
            DataType::Int8 => Scalar::Int(i8::read_le(bytes)?.into()),
            DataType::Int16 => Scalar::Int(i16::read_le(bytes)?.into()),
            DataType::Int32 => Scalar::Int(i32::read_le(bytes)?.into()),
            DataType::Int64 => Scalar::Int(i64::read_le(bytes)?),
            DataType::UInt8 => Scalar::UInt(u8::read_le(bytes)?.into()),
            DataType::UInt16 => Scalar::UInt(u16::read_le(bytes)?.into()),
            DataType::UInt32 => Scalar::UInt(u32::read_le(bytes)?.into()),
            DataType::UInt64 => Scalar::UInt(u64::read_le(bytes)?),
            DataType::Float => Scalar::Float(f32::read_le(bytes)?.into()),
            DataType::Double => Scalar::Float(f64::read_le(bytes)?),
        })
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::UInt8 => "uint8",
            DataType::UInt16 => "uint16",
            DataType::UInt32 => "uint32",
            DataType::UInt64 => "uint64",
            DataType::Float => "float",
            DataType::Double => "double",
        };
        write!(f, "{}", name)
    }
}

/// A primitive type that can be stored in an object.
pub trait Element: Copy + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn write_le(self, out: &mut Vec<u8>);

    fn read_le(bytes: &[u8]) -> Result<Self>;
}

macro_rules! impl_element {
    ($($ty:ty => $data_type:ident),+ $(,)?) => {
        $(
            impl Element for $ty {
                const DATA_TYPE: DataType = DataType::$data_type;

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Result<Self> {
                    let bytes = <[u8; std::mem::size_of::<$ty>()]>::try_from(bytes).map_err(|_| {
                        Error::validation(format!(
                            "{} element needs {} bytes, got {}",
                            DataType::$data_type,
                            std::mem::size_of::<$ty>(),
                            bytes.len()
                        ))
                    })?;
                    Ok(<$ty>::from_le_bytes(bytes))
                }
            }
        )+
    };
}

impl_element! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
}

/// Pack values into a buffer suitable for a write transfer.
pub fn to_bytes<T: Element>(values: &[T]) -> Bytes {
    let mut out = Vec::with_capacity(values.len() * T::DATA_TYPE.size());
    for value in values {
        value.write_le(&mut out);
    }
    Bytes::from(out)
}

/// Unpack a buffer returned by a read transfer.
pub fn from_bytes<T: Element>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = T::DATA_TYPE.size();
    if bytes.len() % size != 0 {
        return Err(Error::validation(format!(
            "buffer of {} bytes is not a whole number of {} elements",
            bytes.len(),
            T::DATA_TYPE
        )));
    }
    bytes.chunks_exact(size).map(T::read_le).collect()
}
