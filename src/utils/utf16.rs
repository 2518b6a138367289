/// Decodes UTF-16LE bytes, stopping at the first NUL code unit.
///
/// Returns `None` for an odd number of bytes or unpaired surrogates.
pub fn decode_utf16le(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }

    let units = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&unit| unit != 0);

    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}
