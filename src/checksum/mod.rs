use crc16::{State, ARC, X_25};

/// CRC used by ASCII telegrams: polynomial 0xA001 (reflected 0x8005), seed 0.
pub fn crc16_ascii(data: &[u8]) -> u16 {
    State::<ARC>::calculate(data)
}

/// CRC used by HDLC framed binary telegrams: polynomial 0x8408, seed and
/// final XOR 0xFFFF.
pub fn crc16_x25(data: &[u8]) -> u16 {
    State::<X_25>::calculate(data)
}

/// Read the hexadecimal checksum that follows the '!' of an ASCII telegram.
/// At most four digits are consumed, anything after them is ignored.
pub fn parse_ascii_checksum(text: &[u8]) -> Option<u16> {
    let digits = text.iter().take(4).take_while(|b| b.is_ascii_hexdigit()).count();
    if digits == 0 {
        return None;
    }
    let digits = std::str::from_utf8(&text[..digits]).ok()?;
    u16::from_str_radix(digits, 16).ok()
}

/// Two raw bytes, least significant first.
pub fn parse_binary_checksum(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_loop(data: &[u8], seed: u16, poly: u16, xor_out: u16) -> u16 {
        let mut crc = seed;
        for &byte in data {
            crc ^= byte as u16;
            for _ in 0..8 {
                crc = if crc & 0x0001 != 0 { (crc >> 1) ^ poly } else { crc >> 1 };
            }
        }
        crc ^ xor_out
    }

    #[test]
    fn test_check_values() {
        assert_eq!(crc16_ascii(b"123456789"), 0xBB3D);
        assert_eq!(crc16_x25(b"123456789"), 0x906E);
    }

    #[test]
    fn test_matches_bit_loop() {
        let samples: [&[u8]; 4] = [
            b"",
            b"/ISk5\\2MT382-1000\r\n\r\n1-0:1.8.1(001234.567*kWh)\r\n!",
            &[0xa0, 0x2a, 0xce, 0xff, 0x03, 0x13, 0xd0, 0x45, 0xe6, 0xe7, 0x00, 0x0f],
            &[0xff; 64],
        ];
        for data in samples {
            assert_eq!(crc16_ascii(data), reference_loop(data, 0x0000, 0xA001, 0x0000));
            assert_eq!(crc16_x25(data), reference_loop(data, 0xFFFF, 0x8408, 0xFFFF));
        }
    }

    #[test]
    fn test_parse_ascii_checksum() {
        assert_eq!(parse_ascii_checksum(b"1234\r\n"), Some(0x1234));
        assert_eq!(parse_ascii_checksum(b"ab0F\r\n"), Some(0xAB0F));
        assert_eq!(parse_ascii_checksum(b"12\r\n"), Some(0x12));
        assert_eq!(parse_ascii_checksum(b"\r\n"), None);
        assert_eq!(parse_ascii_checksum(b""), None);
    }

    #[test]
    fn test_parse_binary_checksum() {
        assert_eq!(parse_binary_checksum(&[0x34, 0x12, 0x7e]), Some(0x1234));
        assert_eq!(parse_binary_checksum(&[0x34]), None);
    }
}
