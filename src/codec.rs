//! Raw blob encoding for stored vectors.
//!
//! A vector of `L` values is stored as exactly `4 * L` bytes of little-endian
//! IEEE-754 f32, with no header, length prefix or version tag.

use bytes::{Buf, BufMut, Bytes, BytesMut};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Serializes `vector` into its raw little-endian blob.
pub fn encode_vector(vector: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(vector.len() * F32_BYTES);
    for &value in vector {
        buf.put_f32_le(value);
    }
    buf.freeze()
}

/// Inverse of [`encode_vector`]. Returns `None` when the blob length is not a
/// multiple of four, which marks a corrupt row.
pub fn decode_vector(mut raw: &[u8]) -> Option<Vec<f32>> {
    if raw.len() % F32_BYTES != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(raw.len() / F32_BYTES);
    while raw.has_remaining() {
        out.push(raw.get_f32_le());
    }
    Some(out)
}

/// Number of values a well-formed blob of `byte_len` bytes holds.
pub fn vector_len(byte_len: usize) -> Option<usize> {
    (byte_len % F32_BYTES == 0).then_some(byte_len / F32_BYTES)
}
