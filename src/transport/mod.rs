use std::collections::VecDeque;

use log::warn;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{Receiver, UnboundedSender};

/// Non-blocking byte input of the reader.
pub trait ByteSource {
    fn available(&mut self) -> bool;
    fn read_byte(&mut self) -> Option<u8>;
    /// Passthrough to a secondary P1 device.
    fn write_byte(&mut self, byte: u8);
    /// Hand over everything written since the last flush.
    fn flush(&mut self) {}
}

impl<T: ByteSource + ?Sized> ByteSource for &mut T {
    fn available(&mut self) -> bool {
        (**self).available()
    }

    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn write_byte(&mut self, byte: u8) {
        (**self).write_byte(byte)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

/// Bytes queued in memory, echoed bytes are collected in `written`.
#[derive(Default)]
pub struct MemorySource {
    pending: VecDeque<u8>,
    pub written: Vec<u8>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend(data.iter().copied());
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl ByteSource for MemorySource {
    fn available(&mut self) -> bool {
        !self.pending.is_empty()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.pending.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        self.written.push(byte);
    }
}

/// Source fed with chunks from a tokio channel, e.g. by a task reading a
/// serial port or stdin. Echoed bytes are collected and sent as one chunk
/// per flush.
pub struct ChannelSource {
    receiver: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    echo: Option<UnboundedSender<Vec<u8>>>,
    echo_pending: Vec<u8>,
    closed: bool,
}

impl ChannelSource {
    pub fn new(receiver: Receiver<Vec<u8>>, echo: Option<UnboundedSender<Vec<u8>>>) -> Self {
        Self { receiver, pending: VecDeque::new(), echo, echo_pending: Vec::new(), closed: false }
    }

    fn fill(&mut self) {
        while self.pending.is_empty() && !self.closed {
            match self.receiver.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.closed = true,
            }
        }
    }

    /// Input side closed and every received byte consumed.
    pub fn is_finished(&mut self) -> bool {
        self.fill();
        self.closed && self.pending.is_empty()
    }
}

impl ByteSource for ChannelSource {
    fn available(&mut self) -> bool {
        self.fill();
        !self.pending.is_empty()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.fill();
        self.pending.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        if self.echo.is_some() {
            self.echo_pending.push(byte);
        }
    }

    fn flush(&mut self) {
        if self.echo_pending.is_empty() {
            return;
        }
        let chunk = std::mem::take(&mut self.echo_pending);
        let dropped = match &self.echo {
            Some(echo) => echo.send(chunk).err().map(|e| e.0.len()),
            None => None,
        };
        if let Some(dropped) = dropped {
            warn!("Passthrough closed, {} bytes dropped", dropped);
            self.echo = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source() {
        let mut source = MemorySource::new();
        assert!(!source.available());
        source.push(b"/A");
        assert!(source.available());
        assert_eq!(source.read_byte(), Some(b'/'));
        source.write_byte(b'/');
        assert_eq!(source.read_byte(), Some(b'A'));
        assert_eq!(source.read_byte(), None);
        assert_eq!(source.written, b"/".to_vec());
    }

    #[test]
    fn test_channel_source() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let (echo_tx, mut echo_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut source = ChannelSource::new(rx, Some(echo_tx));

        assert!(!source.available());
        tx.try_send(vec![1, 2]).unwrap();
        assert!(source.available());
        assert_eq!(source.read_byte(), Some(1));
        source.write_byte(1);
        assert!(echo_rx.try_recv().is_err());
        source.flush();
        assert_eq!(echo_rx.try_recv().unwrap(), vec![1]);
        source.flush();
        assert!(echo_rx.try_recv().is_err());
        assert!(!source.is_finished());

        drop(tx);
        assert_eq!(source.read_byte(), Some(2));
        assert!(source.is_finished());
    }

    #[test]
    fn test_channel_source_echoes_whole_burst() {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let (echo_tx, mut echo_rx) = tokio::sync::mpsc::unbounded_channel();
        let mut source = ChannelSource::new(rx, Some(echo_tx));
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        tx.try_send(data.clone()).unwrap();

        while let Some(byte) = source.read_byte() {
            source.write_byte(byte);
        }
        source.flush();

        assert_eq!(echo_rx.try_recv().unwrap(), data);
        assert!(echo_rx.try_recv().is_err());
    }
}
