use log::warn;

/// Bytes summarised per "Discarding" warning.
pub const DISCARD_LOG_BYTES: usize = 32;

/// Collects bytes thrown away during error recovery as hex text.
pub struct DiscardLog {
    buffer: [u8; DISCARD_LOG_BYTES * 2],
    position: usize,
}

impl DiscardLog {
    pub fn new() -> Self {
        Self { buffer: [0; DISCARD_LOG_BYTES * 2], position: 0 }
    }

    pub fn add_byte(&mut self, byte: u8) {
        if hex::encode_to_slice([byte], &mut self.buffer[self.position..self.position + 2]).is_ok() {
            self.position += 2;
        }
        if self.position == self.buffer.len() {
            self.flush();
        }
    }

    pub fn pending(&self) -> &str {
        std::str::from_utf8(&self.buffer[..self.position]).unwrap_or("")
    }

    /// Emit whatever is collected, returns the logged text.
    pub fn flush(&mut self) -> Option<String> {
        if self.position == 0 {
            return None;
        }
        let text = self.pending().to_string();
        warn!("Discarding: {}", text);
        self.position = 0;
        Some(text)
    }
}

impl Default for DiscardLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_partial() {
        let mut log = DiscardLog::new();
        assert_eq!(log.flush(), None);
        log.add_byte(0xab);
        log.add_byte(0x01);
        assert_eq!(log.pending(), "ab01");
        assert_eq!(log.flush(), Some("ab01".to_string()));
        assert_eq!(log.pending(), "");
    }

    #[test]
    fn test_flushes_when_full() {
        let mut log = DiscardLog::new();
        for _ in 0..DISCARD_LOG_BYTES {
            log.add_byte(0xff);
        }
        assert_eq!(log.pending(), "");
        log.add_byte(0x10);
        assert_eq!(log.pending(), "10");
    }
}
