/// Display string for a DLMS unit enumeration value (IEC 62056-62).
pub fn get_dlms_unit_name(unit_code: u8) -> Option<&'static str> {
    match unit_code {
        1 => Some("a"),          // year
        2 => Some("mo"),         // month
        3 => Some("wk"),         // week
        4 => Some("d"),          // day
        5 => Some("h"),          // hour
        6 => Some("min."),       // minute
        7 => Some("s"),          // second
        8 => Some("°"),          // phase angle
        9 => Some("°C"),         // temperature
        10 => Some("currency"),
        11 => Some("m"),         // length
        12 => Some("m/s"),       // speed
        13 => Some("m^3"),       // volume
        14 => Some("m^3"),       // corrected volume
        15 => Some("m^3/h"),     // volume flux
        16 => Some("m^3/h"),     // corrected volume flux
        17 => Some("m^3/d"),
        18 => Some("m^3/d"),
        19 => Some("l"),         // litre
        20 => Some("kg"),
        21 => Some("N"),         // force
        22 => Some("Nm"),        // energy
        23 => Some("Pa"),
        24 => Some("bar"),
        25 => Some("J"),
        26 => Some("J/h"),
        27 => Some("W"),         // active power
        28 => Some("VA"),        // apparent power
        29 => Some("var"),       // reactive power
        30 => Some("Wh"),        // active energy
        31 => Some("VAh"),       // apparent energy
        32 => Some("varh"),      // reactive energy
        33 => Some("A"),
        34 => Some("C"),         // electrical charge
        35 => Some("V"),
        36 => Some("V/m"),
        37 => Some("F"),         // capacitance
        38 => Some("Ohm"),
        39 => Some("Ohm*m^2/m"), // resistivity
        40 => Some("Wb"),        // magnetic flux
        41 => Some("T"),         // magnetic flux density
        42 => Some("A/m"),
        43 => Some("H"),         // inductance
        44 => Some("Hz"),
        45 => Some("1/(Wh)"),
        46 => Some("1/(varh)"),
        47 => Some("1/(VAh)"),
        48 => Some("V^2h"),
        49 => Some("A^2h"),
        50 => Some("kg/s"),
        51 => Some("S"),         // conductance
        52 => Some("K"),
        53 => Some("1/(V^2h)"),
        54 => Some("1/(A^2h)"),
        55 => Some("1/m^3"),
        56 => Some("%"),
        57 => Some("Ah"),
        60 => Some("Wh/m^3"),
        61 => Some("J/m^3"),
        62 => Some("Mol %"),
        63 => Some("g/m^3"),
        64 => Some("Pa s"),
        253 => Some(""),         // reserved
        254 => Some("other"),
        255 => Some("count"),
        _ => None,
    }
}

pub fn unit_to_string(unit_code: u8) -> &'static str {
    get_dlms_unit_name(unit_code).unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_units() {
        assert_eq!(get_dlms_unit_name(27), Some("W"));
        assert_eq!(get_dlms_unit_name(30), Some("Wh"));
        assert_eq!(get_dlms_unit_name(35), Some("V"));
        assert_eq!(get_dlms_unit_name(33), Some("A"));
    }

    #[test]
    fn test_unknown_unit() {
        assert_eq!(get_dlms_unit_name(0), None);
        assert_eq!(get_dlms_unit_name(58), None);
        assert_eq!(unit_to_string(100), "Unknown");
        assert_eq!(unit_to_string(255), "count");
    }
}
