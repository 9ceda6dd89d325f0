//! CRC32C (Castagnoli) checksums over files and line ranges.
//!
//! Tokens and journal entries both key off these values, so the functions
//! here must stay deterministic across platforms: ranges are hashed over
//! their `\n`-joined textual representation regardless of the original line
//! endings.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crc::CRC_32_ISCSI;
use crc::Crc;

const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub fn crc32c_bytes(bytes: &[u8]) -> u32 {
    CRC32C.checksum(bytes)
}

/// Streaming checksum of a file's raw bytes.
pub fn crc32c_file(path: &Path) -> std::io::Result<u32> {
    let mut file = File::open(path)?;
    let mut digest = CRC32C.digest();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
    }
    Ok(digest.finalize())
}

/// Checksum of a line range's canonical text (`\n`-joined, no trailing
/// newline).
pub fn crc32c_lines(lines: &[&str]) -> u32 {
    let mut digest = CRC32C.digest();
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            digest.update(b"\n");
        }
        digest.update(line.as_bytes());
    }
    digest.finalize()
}

/// Checksum of lines `start..=end` (1-based, inclusive) of `text`.
pub fn crc32c_range(text: &str, start: usize, end: usize) -> u32 {
    let lines: Vec<&str> = text.lines().collect();
    let from = start.saturating_sub(1).min(lines.len());
    let to = end.min(lines.len());
    crc32c_lines(&lines[from..to])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn known_castagnoli_vector() {
        // RFC 3720 test vector: CRC32C("123456789") = 0xE3069283.
        assert_eq!(crc32c_bytes(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn range_checksum_is_line_ending_independent() {
        let unix = "alpha\nbeta\ngamma\n";
        let dos = "alpha\r\nbeta\r\ngamma\r\n";
        // `lines()` strips `\r`, so both representations hash identically.
        assert_eq!(crc32c_range(unix, 1, 3), crc32c_range(dos, 1, 3));
    }

    #[test]
    fn file_and_bytes_agree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"payload bytes").unwrap();
        assert_eq!(crc32c_file(&path).unwrap(), crc32c_bytes(b"payload bytes"));
    }

    #[test]
    fn range_clamps_to_file_length() {
        let text = "one\ntwo\n";
        assert_eq!(crc32c_range(text, 1, 99), crc32c_lines(&["one", "two"]));
        assert_eq!(crc32c_range(text, 2, 2), crc32c_lines(&["two"]));
    }
}
