use std::fmt::Write;

/// Format `data` as a canonical hex dump (`hexdump -C` style), with addresses starting at
/// `offset`. Used to attach the offending bytes to `debug!` logs.
pub(crate) fn hexdump(data: &[u8], offset: usize) -> String {
    let mut out = String::with_capacity(data.len() * 4 + 16);

    for (i, line) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}: ", offset + i * 16);

        for column in 0..16 {
            match line.get(column) {
                Some(byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                }
                None => out.push_str("   "),
            }
            if column == 7 {
                out.push(' ');
            }
        }

        out.push('|');
        out.extend(line.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hexdump_partial_line() {
        let dump = hexdump(b"ElfChnk\0\x01", 0x1000);
        assert_eq!(
            dump,
            "00001000: 45 6c 66 43 68 6e 6b 00  01                       |ElfChnk..|\n"
        );
    }
}
