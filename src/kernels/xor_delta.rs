//! This module contains the pure, stateless kernels for performing
//! XOR delta encoding and decoding on blocks of fixed-width elements.
//!
//! Every element is XORed with its predecessor, byte by byte. It is particularly
//! effective for slowly changing data, where it isolates the few changing bits.
//! Works on raw bytes so it applies to any element width.

/// Views 8-byte elements as `u64` words when the buffer happens to be aligned.
/// XOR is bytewise, so the host byte order does not matter.
fn as_words(data: &mut [u8], typesize: usize) -> Option<&mut [u64]> {
    if typesize != 8 {
        return None;
    }
    bytemuck::try_cast_slice_mut(data).ok()
}

/// Performs XOR delta encoding **in-place**.
fn xor_delta_inplace(data: &mut [u8], typesize: usize) {
    let body = (data.len() / typesize) * typesize;
    if let Some(words) = as_words(&mut data[..body], typesize) {
        for i in (1..words.len()).rev() {
            words[i] ^= words[i - 1];
        }
        return;
    }
    // Iterate backwards for encoding to use original values for calculation.
    for i in (typesize..body).rev() {
        data[i] ^= data[i - typesize];
    }
}

/// Reconstructs the original data from an XOR delta stream **in-place**.
fn xor_undelta_inplace(data: &mut [u8], typesize: usize) {
    let body = (data.len() / typesize) * typesize;
    if let Some(words) = as_words(&mut data[..body], typesize) {
        for i in 1..words.len() {
            words[i] ^= words[i - 1];
        }
        return;
    }
    // Iterate forwards to use the newly-decoded values for subsequent XORs.
    for i in typesize..body {
        data[i] ^= data[i - typesize];
    }
}

/// The public-facing encode function for this module.
pub fn encode(input: &[u8], typesize: usize) -> Vec<u8> {
    let mut data = input.to_vec();
    if typesize > 0 {
        xor_delta_inplace(&mut data, typesize);
    }
    data
}

/// The public-facing decode function for this module.
pub fn decode(input: &[u8], typesize: usize) -> Vec<u8> {
    let mut data = input.to_vec();
    if typesize > 0 {
        xor_undelta_inplace(&mut data, typesize);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xor_delta_roundtrip_u32_stream() {
        let values: Vec<u32> = vec![100, 101, 103, 103, 90];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();

        let encoded = encode(&bytes, 4);
        // The repeated value becomes an all-zero element.
        assert_eq!(&encoded[12..16], &[0, 0, 0, 0]);
        assert_eq!(decode(&encoded, 4), bytes);
    }

    #[test]
    fn test_xor_delta_u64_matches_bytewise() {
        let values: Vec<u64> = vec![1 << 40, (1 << 40) + 3, 7, 7, u64::MAX];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut bytewise = bytes.clone();
        for i in (8..bytewise.len()).rev() {
            bytewise[i] ^= bytewise[i - 8];
        }
        let encoded = encode(&bytes, 8);
        assert_eq!(encoded, bytewise);
        assert_eq!(decode(&encoded, 8), bytes);
    }

    #[test]
    fn test_xor_delta_empty_and_single() {
        assert!(encode(&[], 4).is_empty());
        assert_eq!(encode(&[1, 2, 3, 4], 4), vec![1, 2, 3, 4]);
    }
}
