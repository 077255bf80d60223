//! Text decoding for input files of unknown provenance.

/// Decode bytes as UTF-8 (BOM tolerated), falling back to Latin-1, which
/// accepts every byte sequence. Covers the encodings seen in practice:
/// UTF-8 with or without BOM, ISO-8859-1 and the Windows exports close to it.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
