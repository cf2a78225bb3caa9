//! Chunk concatenation and integrity checks, independent of the database.

use sha2::{Digest, Sha256};

/// One fetched fragment of an upload, ordered by `seq`.
#[derive(Debug, Clone)]
pub struct ChunkPart {
    pub seq: i32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssembleError {
    Empty,
    CountMismatch { have: usize, want: usize },
    SeqGap { expected: i32, found: i32 },
    ChecksumMismatch,
}

/// Concatenates parts in seq order and verifies the declared shape.
///
/// Parts must arrive sorted ascending by seq and cover exactly
/// `1..=expected_total`. An empty `checksum` skips the digest comparison;
/// otherwise it is compared case-insensitively against the SHA-256 hex of
/// the concatenation.
pub fn assemble(
    parts: &[ChunkPart],
    expected_total: i32,
    checksum: &str,
) -> Result<Vec<u8>, AssembleError> {
    if parts.is_empty() {
        return Err(AssembleError::Empty);
    }

    let want = usize::try_from(expected_total).unwrap_or(0);
    if parts.len() != want {
        return Err(AssembleError::CountMismatch {
            have: parts.len(),
            want,
        });
    }

    for (index, part) in parts.iter().enumerate() {
        let expected = index as i32 + 1;
        if part.seq != expected {
            return Err(AssembleError::SeqGap {
                expected,
                found: part.seq,
            });
        }
    }

    let mut buf = Vec::with_capacity(parts.iter().map(|part| part.data.len()).sum());
    for part in parts {
        buf.extend_from_slice(&part.data);
    }

    if !checksum.is_empty() {
        let digest = hex::encode(Sha256::digest(&buf));
        if !digest.eq_ignore_ascii_case(checksum) {
            return Err(AssembleError::ChecksumMismatch);
        }
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(chunks: &[(i32, &[u8])]) -> Vec<ChunkPart> {
        chunks
            .iter()
            .map(|(seq, data)| ChunkPart {
                seq: *seq,
                data: data.to_vec(),
            })
            .collect()
    }

    fn digest_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    #[test]
    fn concatenates_in_seq_order() {
        let parts = parts(&[(1, b"he"), (2, b"ll"), (3, b"o!")]);
        let buf = assemble(&parts, 3, "").unwrap();
        assert_eq!(buf, b"hello!");
    }

    #[test]
    fn verifies_checksum_case_insensitively() {
        let parts = parts(&[(1, b"ab"), (2, b"cd")]);
        let checksum = digest_hex(b"abcd").to_uppercase();
        let buf = assemble(&parts, 2, &checksum).unwrap();
        assert_eq!(buf, b"abcd");
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let parts = parts(&[(1, b"ab"), (2, b"cd")]);
        let err = assemble(&parts, 2, &digest_hex(b"something else")).unwrap_err();
        assert_eq!(err, AssembleError::ChecksumMismatch);
    }

    #[test]
    fn rejects_count_mismatch() {
        let parts = parts(&[(1, b"ab"), (2, b"cd")]);
        let err = assemble(&parts, 3, "").unwrap_err();
        assert_eq!(err, AssembleError::CountMismatch { have: 2, want: 3 });
    }

    #[test]
    fn rejects_seq_gaps() {
        // {1,3,4} with total=3 has the right count but the wrong coverage.
        let parts = parts(&[(1, b"a"), (3, b"b"), (4, b"c")]);
        let err = assemble(&parts, 3, "").unwrap_err();
        assert_eq!(err, AssembleError::SeqGap { expected: 2, found: 3 });
    }

    #[test]
    fn rejects_empty_input() {
        assert_eq!(assemble(&[], 1, "").unwrap_err(), AssembleError::Empty);
    }

    #[test]
    fn skips_checksum_when_unset() {
        let parts = parts(&[(1, b"anything")]);
        assert!(assemble(&parts, 1, "").is_ok());
    }
}
