pub mod units;

/// Key used for sensors whose OBIS code could not be parsed. It never matches
/// a decoded record.
pub const OBIS_ERROR: u32 = 0xffff_ffff;

/// Active tariff indicator.
pub const OBIS_ACTIVE_TARIFF: u32 = obis(0, 2, 2);

/// Combine the three values identifying a quantity into a single key for easier
/// handling and comparison.
pub const fn obis(major: u32, minor: u32, micro: u32) -> u32 {
    ((major & 0xfff) << 16) | ((minor & 0xff) << 8) | (micro & 0xff)
}

pub const fn obis_parts(code: u32) -> (u32, u32, u32) {
    ((code >> 16) & 0xfff, (code >> 8) & 0xff, code & 0xff)
}

/// Parse "major.minor.micro" into an OBIS key, OBIS_ERROR on anything else.
pub fn obis_from_str(code: &str) -> u32 {
    let mut parts = [0u32; 3];
    let mut count = 0;

    for part in code.split('.') {
        if count == 3 || part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return OBIS_ERROR;
        }
        parts[count] = match part.parse::<u32>() {
            Ok(v) => v,
            Err(_) => return OBIS_ERROR,
        };
        count += 1;
    }

    if count != 3 || parts[0] > 0xfff || parts[1] > 0xff || parts[2] > 0xff {
        return OBIS_ERROR;
    }

    obis(parts[0], parts[1], parts[2])
}

pub fn format_obis(code: u32) -> String {
    if code == OBIS_ERROR {
        return "invalid".to_string();
    }
    let (major, minor, micro) = obis_parts(code);
    format!("{}.{}.{}", major, minor, micro)
}

/// Index (0..4) of a per-tariff import energy register.
pub fn import_tariff_slot(code: u32) -> Option<usize> {
    match code {
        c if c == obis(1, 8, 1) => Some(0),
        c if c == obis(1, 8, 2) => Some(1),
        c if c == obis(1, 8, 3) => Some(2),
        c if c == obis(1, 8, 4) => Some(3),
        _ => None,
    }
}

/// Index (0..4) of a per-tariff export energy register.
pub fn export_tariff_slot(code: u32) -> Option<usize> {
    match code {
        c if c == obis(2, 8, 1) => Some(0),
        c if c == obis(2, 8, 2) => Some(1),
        c if c == obis(2, 8, 3) => Some(2),
        c if c == obis(2, 8, 4) => Some(3),
        _ => None,
    }
}

pub fn get_obis_description(code: u32) -> Option<&'static str> {
    let (major, minor, micro) = obis_parts(code);
    match (major, minor, micro) {
        // Energy values
        (1, 8, 0) => Some("Active energy + (total)"),
        (1, 8, 1) => Some("Active energy + (tariff 1)"),
        (1, 8, 2) => Some("Active energy + (tariff 2)"),
        (1, 8, 3) => Some("Active energy + (tariff 3)"),
        (1, 8, 4) => Some("Active energy + (tariff 4)"),
        (2, 8, 0) => Some("Active energy - (total)"),
        (2, 8, 1) => Some("Active energy - (tariff 1)"),
        (2, 8, 2) => Some("Active energy - (tariff 2)"),
        (2, 8, 3) => Some("Active energy - (tariff 3)"),
        (2, 8, 4) => Some("Active energy - (tariff 4)"),
        (3, 8, 0) => Some("Reactive energy + (total)"),
        (4, 8, 0) => Some("Reactive energy - (total)"),

        // Power values
        (1, 7, 0) => Some("Active power + (total)"),
        (2, 7, 0) => Some("Active power - (total)"),
        (3, 7, 0) => Some("Reactive power + (total)"),
        (4, 7, 0) => Some("Reactive power - (total)"),
        (21, 7, 0) => Some("Active power + (L1)"),
        (41, 7, 0) => Some("Active power + (L2)"),
        (61, 7, 0) => Some("Active power + (L3)"),
        (22, 7, 0) => Some("Active power - (L1)"),
        (42, 7, 0) => Some("Active power - (L2)"),
        (62, 7, 0) => Some("Active power - (L3)"),

        // Voltage and current
        (32, 7, 0) => Some("Voltage (L1)"),
        (52, 7, 0) => Some("Voltage (L2)"),
        (72, 7, 0) => Some("Voltage (L3)"),
        (31, 7, 0) => Some("Current (L1)"),
        (51, 7, 0) => Some("Current (L2)"),
        (71, 7, 0) => Some("Current (L3)"),

        // Identification and tariff
        (0, 2, 2) => Some("Active tariff"),
        (0, 9, 1) => Some("Local time"),
        (0, 9, 2) => Some("Local date"),
        (96, 1, 0) => Some("Equipment identifier"),
        (96, 1, 1) => Some("Equipment identifier 1"),
        (96, 14, 0) => Some("Tariff indicator"),
        (14, 7, 0) => Some("Supply frequency"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obis_parts_roundtrip() {
        for (major, minor, micro) in [(0, 0, 0), (1, 8, 1), (0xfff, 0xff, 0xff), (96, 14, 0), (0x800, 0x80, 0x01)] {
            assert_eq!(obis_parts(obis(major, minor, micro)), (major, minor, micro));
        }
    }

    #[test]
    fn test_obis_equality() {
        assert_eq!(obis(1, 8, 1), obis(1, 8, 1));
        assert_ne!(obis(1, 8, 1), obis(1, 8, 2));
        assert_ne!(obis(1, 8, 1), obis(2, 8, 1));
        assert_ne!(obis(0xfff, 0xff, 0xff), OBIS_ERROR);
    }

    #[test]
    fn test_obis_from_str() {
        assert_eq!(obis_from_str("1.8.1"), obis(1, 8, 1));
        assert_eq!(obis_from_str("0.2.2"), OBIS_ACTIVE_TARIFF);
        assert_eq!(obis_from_str("4095.255.255"), obis(4095, 255, 255));
    }

    #[test]
    fn test_obis_from_str_invalid() {
        assert_eq!(obis_from_str(""), OBIS_ERROR);
        assert_eq!(obis_from_str("1.8"), OBIS_ERROR);
        assert_eq!(obis_from_str("1.8.1.5"), OBIS_ERROR);
        assert_eq!(obis_from_str("1.8.1x"), OBIS_ERROR);
        assert_eq!(obis_from_str("1..1"), OBIS_ERROR);
        assert_eq!(obis_from_str("1-0:1.8.1"), OBIS_ERROR);
        assert_eq!(obis_from_str("metertime"), OBIS_ERROR);
        assert_eq!(obis_from_str("4096.0.0"), OBIS_ERROR);
        assert_eq!(obis_from_str("1.256.0"), OBIS_ERROR);
    }

    #[test]
    fn test_format_obis() {
        assert_eq!(format_obis(obis(1, 8, 1)), "1.8.1");
        assert_eq!(format_obis(OBIS_ERROR), "invalid");
    }

    #[test]
    fn test_tariff_slots() {
        assert_eq!(import_tariff_slot(obis(1, 8, 3)), Some(2));
        assert_eq!(import_tariff_slot(obis(1, 8, 0)), None);
        assert_eq!(export_tariff_slot(obis(2, 8, 4)), Some(3));
        assert_eq!(export_tariff_slot(obis(1, 8, 1)), None);
    }

    #[test]
    fn test_get_obis_description() {
        assert_eq!(get_obis_description(obis(1, 8, 1)), Some("Active energy + (tariff 1)"));
        assert_eq!(get_obis_description(OBIS_ACTIVE_TARIFF), Some("Active tariff"));
        assert_eq!(get_obis_description(obis(200, 1, 1)), None);
    }
}
