//! This module contains the pure, stateless kernel for byte-shuffling blocks of
//! fixed-width elements.
//!
//! It reorganizes a row-oriented byte stream into a "byte-plane" layout: all
//! first bytes, then all second bytes, and so on. Slowly varying numeric data
//! turns into long runs in the high planes, which the codec then compresses well.
//! Trailing bytes that do not form a whole element are copied through unchanged.

/// Performs byte-shuffling of `input` with the given element width.
pub fn encode(input: &[u8], typesize: usize) -> Vec<u8> {
    if typesize <= 1 || input.len() < typesize {
        return input.to_vec();
    }

    let num_elements = input.len() / typesize;
    let body = num_elements * typesize;
    let mut output = vec![0u8; input.len()];

    for (j, element) in input[..body].chunks_exact(typesize).enumerate() {
        for (i, byte) in element.iter().enumerate() {
            output[i * num_elements + j] = *byte;
        }
    }
    output[body..].copy_from_slice(&input[body..]);
    output
}

/// Reverses [`encode`].
pub fn decode(input: &[u8], typesize: usize) -> Vec<u8> {
    if typesize <= 1 || input.len() < typesize {
        return input.to_vec();
    }

    let num_elements = input.len() / typesize;
    let body = num_elements * typesize;
    let mut output = vec![0u8; input.len()];

    for (j, element) in output[..body].chunks_exact_mut(typesize).enumerate() {
        for (i, byte) in element.iter_mut().enumerate() {
            *byte = input[i * num_elements + j];
        }
    }
    output[body..].copy_from_slice(&input[body..]);
    output
}
