//! This module defines shared traits used across the array, evaluator and tensor code.

use std::borrow::Cow;

use crate::types::ScalarKind;

/// A primitive element type that maps 1:1 onto a [`ScalarKind`].
///
/// All byte interpretations are little-endian, matching the on-disk layout of
/// every chunk.
pub trait Element: Copy + Default + Send + Sync + PartialEq + std::fmt::Debug + 'static {
    const KIND: ScalarKind;

    /// Decodes a packed little-endian buffer. Trailing partial elements are ignored.
    fn decode_all(bytes: &[u8]) -> Vec<Self>;

    /// Encodes elements into a packed little-endian buffer.
    fn encode_all(values: &[Self]) -> Vec<u8>;
}

// Implement the trait for all primitive numeric types via safe Pod casts.
macro_rules! impl_element {
    ($T:ty, $kind:ident) => {
        impl Element for $T {
            const KIND: ScalarKind = ScalarKind::$kind;

            #[inline]
            fn decode_all(bytes: &[u8]) -> Vec<Self> {
                let width = std::mem::size_of::<$T>();
                let whole = &bytes[..bytes.len() - bytes.len() % width];
                // `pod_collect_to_vec` copes with unaligned input.
                bytemuck::allocation::pod_collect_to_vec::<u8, $T>(&to_native(whole, width))
            }

            #[inline]
            fn encode_all(values: &[Self]) -> Vec<u8> {
                let width = std::mem::size_of::<$T>();
                to_native(bytemuck::cast_slice::<$T, u8>(values), width).into_owned()
            }
        }
    };
}

impl_element!(i8, Int8);
impl_element!(i16, Int16);
impl_element!(i32, Int32);
impl_element!(i64, Int64);
impl_element!(u8, UInt8);
impl_element!(u16, UInt16);
impl_element!(u32, UInt32);
impl_element!(u64, UInt64);
impl_element!(f32, Float32);
impl_element!(f64, Float64);

// `bool` is not Pod: any non-zero byte reads as true.
impl Element for bool {
    const KIND: ScalarKind = ScalarKind::Bool;

    fn decode_all(bytes: &[u8]) -> Vec<Self> {
        bytes.iter().map(|&b| b != 0).collect()
    }

    fn encode_all(values: &[Self]) -> Vec<u8> {
        values.iter().map(|&v| v as u8).collect()
    }
}

/// Converts between little-endian and host byte order. A no-op on LE hosts.
#[inline]
fn to_native(bytes: &[u8], width: usize) -> Cow<'_, [u8]> {
    if cfg!(target_endian = "little") || width == 1 {
        Cow::Borrowed(bytes)
    } else {
        let mut swapped = bytes.to_vec();
        swapped.chunks_exact_mut(width).for_each(|e| e.reverse());
        Cow::Owned(swapped)
    }
}

/// Decodes a little-endian byte buffer into a vector of elements.
pub(crate) fn decode_elements<T: Element>(bytes: &[u8]) -> Vec<T> {
    T::decode_all(bytes)
}

/// Encodes a slice of elements into a little-endian byte buffer.
pub(crate) fn encode_elements<T: Element>(values: &[T]) -> Vec<u8> {
    T::encode_all(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elements_roundtrip_through_bytes() {
        let values = vec![-1.5f32, 0.0, 3.25];
        let bytes = encode_elements(&values);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_elements::<f32>(&bytes), values);

        let flags = vec![true, false, true];
        assert_eq!(encode_elements(&flags), vec![1, 0, 1]);
        assert_eq!(decode_elements::<bool>(&[1, 0, 7]), vec![true, false, true]);
    }

    #[test]
    fn test_decoding_is_little_endian_and_tolerates_misalignment() {
        let mut bytes = vec![0xAAu8];
        bytes.extend_from_slice(&0x0102_0304u32.to_le_bytes());
        bytes.extend_from_slice(&(-7i32).to_le_bytes());
        // Offset by one byte so the slice is not 4-byte aligned.
        let values = decode_elements::<u32>(&bytes[1..]);
        assert_eq!(values, vec![0x0102_0304, (-7i32) as u32]);
        assert_eq!(encode_elements(&values), &bytes[1..]);

        assert_eq!(decode_elements::<u16>(&[1, 0, 2, 0, 9]), vec![1, 2]);
    }
}
