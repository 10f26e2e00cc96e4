use serde::{Deserialize, Serialize};

use crate::obis_utils::OBIS_ERROR;

/// Deepest DLMS struct nesting that is tracked. Deeper structs are decoded in
/// place at the last level.
pub const MAX_STRUCT_DEPTH: usize = 10;

/// Longest octet string kept as a textual value.
pub const MAX_TEXT_VALUE_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    IdentifyingMessage,
    ReadingMessage,
    VerifyingCrc,
    ProcessingAscii,
    ProcessingBinary,
    Waiting,
    ErrorRecovery,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataFormat {
    Ascii,
    Binary,
}

impl DataFormat {
    pub fn start_byte(&self) -> u8 {
        match self {
            DataFormat::Ascii => b'/',
            DataFormat::Binary => 0x7e,
        }
    }
}

/// Byte storage allocated once and reused for every telegram.
pub struct FixedBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl FixedBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { data: vec![0u8; capacity].into_boxed_slice(), len: 0 }
    }

    /// False when the buffer is full, the byte is not stored then.
    pub fn try_push(&mut self, byte: u8) -> bool {
        if self.len == self.data.len() {
            return false;
        }
        self.data[self.len] = byte;
        self.len += 1;
        true
    }

    /// Stores all of `bytes` or nothing.
    pub fn try_extend(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.data.len() - self.len {
            return false;
        }
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        true
    }

    /// Move everything from `from` on to the start of the buffer.
    pub fn compact(&mut self, from: usize) {
        let from = from.min(self.len);
        self.data.copy_within(from..self.len, 0);
        self.len -= from;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// Position of the DLMS decoder inside nested structs: remaining element count
/// and index of the current element per level.
pub struct StructStack {
    remaining: [u8; MAX_STRUCT_DEPTH],
    offset: [u8; MAX_STRUCT_DEPTH],
    level: usize,
}

impl StructStack {
    pub fn new() -> Self {
        Self { remaining: [0; MAX_STRUCT_DEPTH], offset: [0; MAX_STRUCT_DEPTH], level: 0 }
    }

    pub fn reset(&mut self) {
        self.remaining = [0; MAX_STRUCT_DEPTH];
        self.offset = [0; MAX_STRUCT_DEPTH];
        self.level = 0;
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_at(&self, level: usize, position: u8) -> bool {
        self.level == level && self.offset[level] == position
    }

    /// Enter a struct of `count` elements. Returns false when the depth bound
    /// was hit and the struct is tracked at the current level instead.
    pub fn open(&mut self, count: u8) -> bool {
        let mut descended = true;
        if self.remaining[self.level] == 0 {
            self.remaining[self.level] = count;
        } else if self.level < MAX_STRUCT_DEPTH - 1 {
            self.level += 1;
            self.remaining[self.level] = count;
        } else {
            descended = false;
        }
        self.offset[self.level] = 0;
        descended
    }

    /// Account for one finished element, collapsing every level that ran out
    /// of elements. Returns true when back at the top level.
    pub fn complete_item(&mut self) -> bool {
        self.offset[self.level] = self.offset[self.level].wrapping_add(1);

        while self.remaining[self.level] == 1 {
            self.remaining[self.level] = 0;
            if self.level > 0 {
                self.level -= 1;
            } else {
                break;
            }
        }

        let top = self.level == 0;
        if self.remaining[self.level] > 0 {
            self.remaining[self.level] -= 1;
        }
        top
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Unset,
    Number,
    Text,
}

/// Values collected while walking one top level DLMS structure.
pub struct DecodeAccumulator {
    pub obis: u32,
    pub kind: ValueKind,
    pub value: f64,
    pub text: String,
    pub scalar: i8,
    pub unit: u8,
}

impl DecodeAccumulator {
    pub fn new() -> Self {
        Self {
            obis: OBIS_ERROR,
            kind: ValueKind::Unset,
            value: 0.0,
            text: String::with_capacity(MAX_TEXT_VALUE_LEN),
            scalar: 0,
            unit: 0,
        }
    }

    pub fn reset(&mut self) {
        self.obis = OBIS_ERROR;
        self.kind = ValueKind::Unset;
        self.value = 0.0;
        self.text.clear();
        self.scalar = 0;
        self.unit = 0;
    }

    pub fn set_number(&mut self, value: f64) {
        self.value = value;
        self.kind = ValueKind::Number;
    }

    pub fn set_text(&mut self, bytes: &[u8]) {
        let bytes = &bytes[..bytes.len().min(MAX_TEXT_VALUE_LEN)];
        self.text.clear();
        self.text.push_str(&String::from_utf8_lossy(bytes));
        self.kind = ValueKind::Text;
    }

    pub fn scaled_value(&self) -> f64 {
        self.value * 10f64.powi(self.scalar as i32)
    }
}

/// Entry timestamps (milliseconds) and loop counters of the current cycle.
#[derive(Default)]
pub struct CycleTimes {
    pub identifying: u64,
    pub reading: u64,
    pub verifying: u64,
    pub processing: u64,
    pub waiting: u64,
    pub error_recovery: u64,
    pub message_loops: u32,
    pub processing_loops: u32,
    pub display: bool,
    pub counter: u32,
}
