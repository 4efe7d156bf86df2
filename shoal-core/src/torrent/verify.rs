//! SHA-1 verification of assembled pieces.

use sha1::{Digest, Sha1};

/// Returns true when the SHA-1 of `piece_data` equals `expected_hash`.
pub fn verify_piece(piece_data: &[u8], expected_hash: &[u8; 20]) -> bool {
    let computed_hash = Sha1::digest(piece_data);
    computed_hash.as_slice() == expected_hash
}

/// SHA-1 of a byte slice as a fixed array.
pub fn piece_hash(piece_data: &[u8]) -> [u8; 20] {
    Sha1::digest(piece_data).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_hash() {
        let data = b"hello world";
        let expected: [u8; 20] = hex::decode("2aae6c35c94fcfb415dbe95f408b9ce91ee846ed")
            .unwrap()
            .try_into()
            .unwrap();
        assert!(verify_piece(data, &expected));
    }

    #[test]
    fn test_mismatched_hash() {
        let expected = piece_hash(b"original");
        assert!(!verify_piece(b"tampered", &expected));
    }

    #[test]
    fn test_verification_is_repeatable() {
        let data = vec![42u8; 32_768];
        let expected = piece_hash(&data);
        for _ in 0..3 {
            assert!(verify_piece(&data, &expected));
        }
    }
}
