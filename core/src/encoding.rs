//! Charset detection and text decoding for agent-visible reads.
//!
//! The repository default for mis-declared 8-bit content is windows-1251:
//! buffers that fail strict UTF-8 validation and defeat the statistical
//! probe are re-decoded with the configured fallback code page instead of
//! scattering replacement characters through text the agent is about to
//! edit.

use std::path::Path;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use encoding_rs::UTF_8;

use crate::error::NtsError;
use crate::error::Result;

/// How much of the head of the buffer is scanned for NUL bytes.
const BINARY_SNIFF_LEN: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub charset: &'static str,
}

/// Read and decode a file, rejecting binary content.
pub fn read_text(path: &Path, fallback: &'static Encoding) -> Result<DecodedText> {
    let bytes = std::fs::read(path)?;
    decode_bytes(&bytes, path, fallback)
}

/// Decode a byte buffer. A NUL in the first 8 KiB marks the buffer binary
/// unless a UTF-16/32 byte-order mark explains it.
pub fn decode_bytes(
    bytes: &[u8],
    path: &Path,
    fallback: &'static Encoding,
) -> Result<DecodedText> {
    if contains_nul(bytes) && !has_wide_utf_bom(bytes) {
        return Err(NtsError::Binary {
            path: path.to_path_buf(),
        });
    }

    // BOM-carrying UTF-16/32 is handled by encoding_rs directly.
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        let (text, used, _) = encoding.decode(bytes);
        return Ok(DecodedText {
            text: text.into_owned(),
            charset: used.name(),
        });
    }

    // Strict validation decides UTF-8; the statistical probe only runs for
    // buffers that are not well-formed UTF-8.
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Ok(DecodedText {
            text: text.to_string(),
            charset: UTF_8.name(),
        });
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let guessed = detector.guess(None, true);

    if guessed == UTF_8 {
        // The probe believes UTF-8 but strict validation already failed:
        // decode with the configured code page instead.
        let (text, _, _) = fallback.decode(bytes);
        return Ok(DecodedText {
            text: text.into_owned(),
            charset: fallback.name(),
        });
    }

    let (text, used, had_errors) = guessed.decode(bytes);
    if had_errors {
        let (text, _, _) = fallback.decode(bytes);
        return Ok(DecodedText {
            text: text.into_owned(),
            charset: fallback.name(),
        });
    }
    Ok(DecodedText {
        text: text.into_owned(),
        charset: used.name(),
    })
}

fn contains_nul(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    head.contains(&0)
}

fn has_wide_utf_bom(bytes: &[u8]) -> bool {
    bytes.starts_with(&[0xFF, 0xFE])
        || bytes.starts_with(&[0xFE, 0xFF])
        || bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00])
        || bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF])
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use encoding_rs::WINDOWS_1251;
    use pretty_assertions::assert_eq;

    fn probe(bytes: &[u8]) -> Result<DecodedText> {
        decode_bytes(bytes, Path::new("probe.txt"), WINDOWS_1251)
    }

    #[test]
    fn plain_ascii_decodes_as_utf8() {
        let decoded = probe(b"fn main() {}\n").unwrap();
        assert_eq!(decoded.charset, "UTF-8");
        assert_eq!(decoded.text, "fn main() {}\n");
    }

    #[test]
    fn nul_byte_is_rejected_as_binary() {
        let err = probe(b"ELF\x00\x01\x02").unwrap_err();
        assert!(matches!(err, NtsError::Binary { .. }));
    }

    #[test]
    fn cyrillic_windows_1251_round_trips() {
        let original = "Привет, мир! Это тестовая строка для проверки кодировки.";
        let (bytes, _, _) = WINDOWS_1251.encode(original);
        let decoded = probe(&bytes).unwrap();
        assert_eq!(decoded.text, original);
    }

    #[test]
    fn utf16_bom_excuses_nul_bytes() {
        // "hi" encoded UTF-16LE with BOM: NULs present but not binary.
        let bytes: &[u8] = &[0xFF, 0xFE, b'h', 0x00, b'i', 0x00];
        let decoded = probe(bytes).unwrap();
        assert_eq!(decoded.text, "hi");
        assert_eq!(decoded.charset, "UTF-16LE");
    }
}
