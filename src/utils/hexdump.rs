use std::fmt::Write;

/// Canonical hexdump (`hexdump -C` style) of `data`, with addresses starting at `offset`.
///
/// Every line is prefixed with a newline, so the result can be appended to a message.
pub fn format_hexdump(data: &[u8], offset: u64) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 16);

    for (i, line) in data.chunks(16).enumerate() {
        let address = offset + (i * 16) as u64;
        let _ = write!(out, "\n{address:08x}:");

        for b in line {
            let _ = write!(out, " {b:02x}");
        }
        // pad short lines so the ASCII column lines up
        for _ in line.len()..16 {
            out.push_str("   ");
        }

        out.push_str("  |");
        for &b in line {
            let c = b as char;
            out.push(if c.is_ascii_graphic() || c == ' ' { c } else { '.' });
        }
        out.push('|');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_formats_lines() {
        let data = b"ElfChnk\x00\x01\x00\x00\x00\x00\x00\x00\x00**";
        let dump = format_hexdump(data, 0x1000);
        let lines: Vec<&str> = dump.lines().skip(1).collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "00001000: 45 6c 66 43 68 6e 6b 00 01 00 00 00 00 00 00 00  |ElfChnk.........|"
        );
        assert!(lines[1].starts_with("00001010: 2a 2a "));
        assert!(lines[1].ends_with("|**|"));
    }
}
