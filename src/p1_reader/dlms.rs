use chrono::{FixedOffset, NaiveDate, TimeZone};
use log::debug;

use super::structs::{DecodeAccumulator, StructStack, ValueKind, MAX_STRUCT_DEPTH};
use super::tariff::TariffCounters;
use super::P1Error;
use crate::obis_utils::{obis, OBIS_ACTIVE_TARIFF, OBIS_ERROR};

// Envelope
pub const FRAME_IDENTIFIER: [u8; 4] = [0xe6, 0xe7, 0x00, 0x0f];
const ENVELOPE_SIZE: usize = 8;
const DATE_TIME_SIZE: usize = 12;
const DEVIATION_UNSPECIFIED: i16 = i16::MIN;
const DST_ACTIVE: u8 = 0x80;

// Data types
const DLMS_NULL: u8 = 0x00;
const DLMS_ARRAY: u8 = 0x01;
const DLMS_STRUCT: u8 = 0x02;
const DLMS_INT32: u8 = 0x05;
const DLMS_UINT32: u8 = 0x06;
const DLMS_OCTET_STRING: u8 = 0x09;
const DLMS_STRING: u8 = 0x0a;
const DLMS_DATE_TIME: u8 = 0x0c;
const DLMS_INT8: u8 = 0x0f;
const DLMS_INT16: u8 = 0x10;
const DLMS_UINT8: u8 = 0x11;
const DLMS_UINT16: u8 = 0x12;
const DLMS_ENUM: u8 = 0x16;

const DATE_TIME_ITEM_SIZE: usize = 13;
const OBIS_OCTETS: usize = 6;

#[derive(Debug, PartialEq)]
pub struct DlmsHeader {
    /// Offset of the first data item after the envelope and date field.
    pub data_start: usize,
    pub meter_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    Number(f64),
    Text(String),
}

/// One complete top level structure.
#[derive(Debug, Clone, PartialEq)]
pub struct DlmsRecord {
    pub obis: u32,
    pub value: RecordValue,
    pub unit: u8,
}

/// Check the push envelope and read the meter time out of the date field.
pub fn unwrap_header(data: &[u8]) -> Result<DlmsHeader, P1Error> {
    if data.len() < ENVELOPE_SIZE || data[..4] != FRAME_IDENTIFIER {
        return Err(P1Error::MissingFrameIdentifier);
    }

    let date_size = *data.get(ENVELOPE_SIZE).ok_or(P1Error::Truncated("date-time size"))? as usize;
    let date_start = ENVELOPE_SIZE + 1;
    let date = data
        .get(date_start..date_start + date_size)
        .ok_or(P1Error::Truncated("date-time field"))?;

    let meter_time = if date_size == DATE_TIME_SIZE { format_meter_time(date) } else { None };
    Ok(DlmsHeader { data_start: date_start + date_size, meter_time })
}

/// ISO-8601 local time with the UTC offset of a 12 byte DLMS date-time.
pub fn format_meter_time(date: &[u8]) -> Option<String> {
    if date.len() < DATE_TIME_SIZE {
        return None;
    }
    let year = u16::from_be_bytes([date[0], date[1]]) as i32;
    let (month, day) = (date[2] as u32, date[3] as u32);
    let (hour, minute, second) = (date[5] as u32, date[6] as u32, date[7] as u32);
    let raw_deviation = i16::from_be_bytes([date[9], date[10]]);
    let deviation = if raw_deviation == DEVIATION_UNSPECIFIED { 0 } else { -(raw_deviation as i32) };
    let dst = date[11] & DST_ACTIVE != 0;

    debug!(
        "Meter time: {}-{:02}-{:02} {:02}:{:02}:{:02} TZ: {:+} min {}",
        year, month, day, hour, minute, second, deviation,
        if dst { "DST" } else { "no DST" }
    );

    let offset = match FixedOffset::east_opt(deviation * 60) {
        Some(o) => o,
        None => {
            debug!("Meter time skipped, deviation of {} min is out of range", deviation);
            return None;
        }
    };
    let local = match NaiveDate::from_ymd_opt(year, month, day).and_then(|d| d.and_hms_opt(hour, minute, second)) {
        Some(l) => l,
        None => {
            debug!("Meter time skipped, not a calendar time: {}", rejected_fields(date));
            return None;
        }
    };
    let stamp = offset.from_local_datetime(&local).single()?;
    Some(stamp.format("%Y-%m-%dT%H:%M:%S%:z").to_string())
}

/// Names the date-time fields that are not specified (all bits set) or out
/// of range.
fn rejected_fields(date: &[u8]) -> String {
    let year = u16::from_be_bytes([date[0], date[1]]);
    let fields = [
        ("year", year == 0xffff, year as u32),
        ("month", !(1..=12).contains(&date[2]), date[2] as u32),
        ("day", !(1..=31).contains(&date[3]), date[3] as u32),
        ("hour", date[5] > 23, date[5] as u32),
        ("minute", date[6] > 59, date[6] as u32),
        ("second", date[7] > 59, date[7] as u32),
    ];
    let named: Vec<String> = fields
        .iter()
        .filter(|(_, bad, _)| *bad)
        .map(|(name, _, raw)| match (*name, *raw) {
            ("year", 0xffff) | (_, 0xff) => format!("{} not specified", name),
            _ => format!("{} {}", name, raw),
        })
        .collect();
    if named.is_empty() {
        "day does not exist in that month".to_string()
    } else {
        named.join(", ")
    }
}

/// Walks DLMS data items, collecting OBIS code, value, scaler and unit per
/// top level structure.
pub struct DlmsDecoder {
    stack: StructStack,
    acc: DecodeAccumulator,
    cursor: usize,
}

impl DlmsDecoder {
    pub fn new() -> Self {
        Self { stack: StructStack::new(), acc: DecodeAccumulator::new(), cursor: 0 }
    }

    pub fn start(&mut self, data_start: usize) {
        self.stack.reset();
        self.acc.reset();
        self.cursor = data_start;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn depth(&self) -> usize {
        self.stack.level()
    }

    fn take<'a>(&mut self, data: &'a [u8], size: usize, what: &'static str) -> Result<&'a [u8], P1Error> {
        let item = self.peek(data, size, what)?;
        self.cursor += size;
        Ok(item)
    }

    fn peek<'a>(&self, data: &'a [u8], size: usize, what: &'static str) -> Result<&'a [u8], P1Error> {
        data.get(self.cursor..self.cursor + size).ok_or(P1Error::Truncated(what))
    }

    /// Decode the item at the cursor. A record is returned whenever a top
    /// level structure with an OBIS code and a value was completed.
    pub fn decode_item(&mut self, data: &[u8], tariff: &mut TariffCounters) -> Result<Option<DlmsRecord>, P1Error> {
        let tag = *data.get(self.cursor).ok_or(P1Error::Truncated("data type"))?;
        let obis_slot = self.stack.is_at(1, 0);
        let value_slot = self.stack.is_at(1, 1);
        let scaler_slot = self.stack.is_at(2, 0);

        match tag {
            DLMS_NULL => self.cursor += 1,
            DLMS_ARRAY => {
                self.take(data, 2, "array")?;
            }
            DLMS_STRUCT => {
                let item = self.take(data, 2, "struct")?;
                if !self.stack.open(item[1]) {
                    debug!("Struct nesting exceeds {} levels, staying at level {}", MAX_STRUCT_DEPTH, self.stack.level());
                }
                return Ok(None);
            }
            DLMS_INT32 => {
                let item = self.take(data, 5, "int32")?;
                if value_slot {
                    self.acc.set_number(i32::from_be_bytes([item[1], item[2], item[3], item[4]]) as f64);
                }
            }
            DLMS_UINT32 => {
                let item = self.take(data, 5, "uint32")?;
                if value_slot {
                    self.acc.set_number(u32::from_be_bytes([item[1], item[2], item[3], item[4]]) as f64);
                }
            }
            DLMS_OCTET_STRING => {
                let size = self.peek(data, 2, "octet string")?[1] as usize;
                let item = self.take(data, 2 + size, "octet string")?;
                let octets = &item[2..];
                if obis_slot && size == OBIS_OCTETS {
                    self.acc.obis = obis(octets[2] as u32, octets[3] as u32, octets[4] as u32);
                    if self.acc.obis == OBIS_ACTIVE_TARIFF {
                        tariff.disable_inference();
                    }
                } else if value_slot {
                    self.acc.set_text(octets);
                }
            }
            DLMS_STRING => {
                let size = self.peek(data, 2, "string")?[1] as usize;
                self.take(data, 2 + size, "string")?;
            }
            DLMS_DATE_TIME => {
                self.take(data, DATE_TIME_ITEM_SIZE, "date-time")?;
            }
            DLMS_INT8 => {
                let value = self.take(data, 2, "int8")?[1] as i8;
                if value_slot {
                    self.acc.set_number(value as f64);
                } else if scaler_slot {
                    self.acc.scalar = value;
                }
            }
            DLMS_INT16 => {
                let item = self.take(data, 3, "int16")?;
                if value_slot {
                    self.acc.set_number(i16::from_be_bytes([item[1], item[2]]) as f64);
                }
            }
            DLMS_UINT8 => {
                let value = self.take(data, 2, "uint8")?[1];
                if value_slot {
                    self.acc.set_number(value as f64);
                }
            }
            DLMS_UINT16 => {
                let item = self.take(data, 3, "uint16")?;
                if value_slot {
                    self.acc.set_number(u16::from_be_bytes([item[1], item[2]]) as f64);
                }
            }
            DLMS_ENUM => {
                self.acc.unit = self.take(data, 2, "enum")?[1];
            }
            other => return Err(P1Error::UnsupportedDataType(other)),
        }

        if self.stack.complete_item() {
            return Ok(self.finish_record(tariff));
        }
        Ok(None)
    }

    fn finish_record(&mut self, tariff: &mut TariffCounters) -> Option<DlmsRecord> {
        let record = if self.acc.obis == OBIS_ERROR {
            None
        } else {
            match self.acc.kind {
                ValueKind::Number => {
                    let value = self.acc.scaled_value();
                    tariff.observe(self.acc.obis, value);
                    Some(DlmsRecord { obis: self.acc.obis, value: RecordValue::Number(value), unit: self.acc.unit })
                }
                ValueKind::Text => Some(DlmsRecord {
                    obis: self.acc.obis,
                    value: RecordValue::Text(self.acc.text.clone()),
                    unit: self.acc.unit,
                }),
                ValueKind::Unset => None,
            }
        };
        self.acc.reset();
        record
    }
}

impl Default for DlmsDecoder {
    fn default() -> Self {
        Self::new()
    }
}
