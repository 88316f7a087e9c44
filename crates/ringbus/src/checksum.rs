//! CRC32C (Castagnoli) checksums for envelope headers and journal records.
//!
//! The `crc32c` crate selects the SSE4.2 / ARMv8 hardware instruction when
//! available and falls back to a table-driven software implementation with
//! bit-identical results, so checksums computed on one core class verify on
//! any other.

/// CRC32C over a single byte slice.
#[inline]
pub fn crc32c(bytes: &[u8]) -> u32 {
    ::crc32c::crc32c(bytes)
}

/// Continue a CRC32C over an additional slice.
///
/// `crc32c_append(crc32c(a), b)` equals `crc32c(a ++ b)`; the envelope codec
/// uses this to checksum header and payload without concatenating them.
#[inline]
pub fn crc32c_append(crc: u32, bytes: &[u8]) -> u32 {
    ::crc32c::crc32c_append(crc, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 3720 §B.4 test vector: 32 zero bytes
        assert_eq!(crc32c(&[0u8; 32]), 0x8a9136aa);
    }

    #[test]
    fn test_append_equals_concat() {
        let a = b"hello ";
        let b = b"world";
        let whole = crc32c(b"hello world");
        assert_eq!(crc32c_append(crc32c(a), b), whole);
    }

    #[test]
    fn test_empty_slice_is_identity() {
        let crc = crc32c(b"payload");
        assert_eq!(crc32c_append(crc, &[]), crc);
    }
}
