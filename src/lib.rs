//! Reader for smart meter P1 ports
//!
//! Telegrams arrive either as ASCII (DSMR style, CRC16 checked) or as binary
//! DLMS push messages in HDLC frames. Decoded values are handed to sensors
//! registered per OBIS code.

pub mod checksum;
pub mod config;
pub mod obis_utils;
pub mod p1_reader;
pub mod sensors;
pub mod transport;

// Re-export common types for easier access
pub use config::P1Config;
pub use p1_reader::{DataFormat, P1Error, P1Reader, ReaderOptions, State};
pub use sensors::{Sensor, TextSensor};
pub use transport::{ByteSource, ChannelSource};
