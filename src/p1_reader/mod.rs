use std::rc::Rc;

use log::{debug, error, info, warn};
use thiserror::Error;

pub mod ascii;
pub mod clock;
pub mod discard_log;
pub mod dlms;
pub mod framing;
pub mod structs;
pub mod tariff;

use crate::config::P1Config;
use crate::obis_utils::{format_obis, units::unit_to_string, OBIS_ACTIVE_TARIFF};
use crate::sensors::{Sensor, SensorRegistry, TextSensor, TextSensorRegistry, Triggers};
use crate::transport::ByteSource;
use ascii::{AsciiDecoder, AsciiLine};
pub use clock::{Clock, ManualClock, SystemClock};
use discard_log::DiscardLog;
use dlms::{DlmsDecoder, DlmsRecord, RecordValue};
use framing::FrameStatus;
pub use structs::{DataFormat, State};
use structs::{CycleTimes, FixedBuffer};
use tariff::TariffCounters;

/// Quiet time while identifying before the line is considered dead.
const MAX_IDLE_MS: u64 = 60_000;
/// A telegram must be complete within this time after its first byte.
const MAX_MESSAGE_MS: u64 = 10_000;
/// Decoding is chopped into slices of this length.
const PROCESSING_BUDGET_MS: u64 = 25;
/// Line must stay quiet this long before error recovery ends.
const QUIET_PERIOD_MS: u64 = 500;
const MAX_DISCARD_PER_CYCLE: usize = 200;

#[derive(Error, Debug, PartialEq)]
pub enum P1Error {
    #[error("Unexpected data (0x{0:02x})")]
    UnexpectedStartByte(u8),
    #[error("Unknown frame format (0x{0:02X})")]
    UnknownFrameFormat(u8),
    #[error("Frame length {0} too short")]
    FrameTooShort(usize),
    #[error("Message buffer overrun")]
    BufferOverrun,
    #[error("Unexpected end (0x{0:02x})")]
    UnexpectedEnd(u8),
    #[error("No checksum after end of message")]
    MissingChecksum,
    #[error("CRC mismatch, calculated {calculated:04X} != {received:04X}")]
    ChecksumMismatch { calculated: u16, received: u16 },
    #[error("Dlms message buffer overrun")]
    DlmsBufferOverrun,
    #[error("Could not find frame identifier")]
    MissingFrameIdentifier,
    #[error("Not enough data for {0}")]
    Truncated(&'static str),
    #[error("Unsupported data type 0x{0:02x}")]
    UnsupportedDataType(u8),
    #[error("No data received for {0} seconds")]
    Idle(u64),
    #[error("Complete message not received within {0} seconds")]
    IncompleteMessage(u64),
    #[error("Data was received before being requested. Make sure the request pin is connected")]
    Unsolicited,
}

/// Settings the reader needs, usually taken from [`P1Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderOptions {
    pub min_period_ms: u32,
    pub buffer_size: usize,
    pub secondary_p1: bool,
    pub data_format: DataFormat,
    pub time_stats_info_interval: u32,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions::from(&P1Config::default())
    }
}

impl From<&P1Config> for ReaderOptions {
    fn from(c: &P1Config) -> Self {
        ReaderOptions {
            min_period_ms: c.min_period_ms,
            buffer_size: c.buffer_size,
            secondary_p1: c.secondary_p1,
            data_format: c.data_format,
            time_stats_info_interval: c.time_stats_info_interval,
        }
    }
}

/// Reads P1 telegrams from a byte source one step per `advance` call and
/// publishes the decoded values to the registered sensors.
pub struct P1Reader<S: ByteSource, C: Clock = SystemClock> {
    source: S,
    clock: C,
    options: ReaderOptions,
    state: State,

    message: FixedBuffer,
    crc_position: usize,
    dlms: FixedBuffer,
    dlms_header_pending: bool,

    ascii: AsciiDecoder,
    dlms_decoder: DlmsDecoder,
    tariff: TariffCounters,
    discard_log: DiscardLog,
    times: CycleTimes,

    sensors: SensorRegistry,
    text_sensors: TextSensorRegistry,
    triggers: Triggers,
}

impl<S: ByteSource> P1Reader<S, SystemClock> {
    pub fn new(source: S, options: ReaderOptions) -> Self {
        Self::with_clock(source, SystemClock::new(), options)
    }
}

impl<S: ByteSource, C: Clock> P1Reader<S, C> {
    pub fn with_clock(source: S, clock: C, options: ReaderOptions) -> Self {
        let now = clock.millis();
        let times = CycleTimes { error_recovery: now, ..Default::default() };
        P1Reader {
            message: FixedBuffer::new(options.buffer_size),
            dlms: FixedBuffer::new(options.buffer_size),
            source,
            clock,
            options,
            state: State::ErrorRecovery,
            crc_position: 0,
            dlms_header_pending: false,
            ascii: AsciiDecoder::new(),
            dlms_decoder: DlmsDecoder::new(),
            tariff: TariffCounters::new(),
            discard_log: DiscardLog::new(),
            times,
            sensors: SensorRegistry::new(),
            text_sensors: TextSensorRegistry::new(),
            triggers: Triggers::default(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Bytes of the telegram currently held.
    pub fn message_len(&self) -> usize {
        self.message.len()
    }

    pub fn triggers_mut(&mut self) -> &mut Triggers {
        &mut self.triggers
    }

    pub fn sensors(&self) -> &SensorRegistry {
        &self.sensors
    }

    pub fn text_sensors(&self) -> &TextSensorRegistry {
        &self.text_sensors
    }

    /// Register a numeric sensor for "major.minor.micro". Returns the key.
    pub fn register_sensor(&mut self, obis_code: &str, sensor: Rc<dyn Sensor>) -> u32 {
        self.sensors.register_code(obis_code, sensor)
    }

    pub fn register_text_sensor(&mut self, identifier: &str, sensor: Rc<dyn TextSensor>) {
        self.text_sensors.register(identifier, sensor);
    }

    /// Run one step of the state machine. Never blocks.
    pub fn advance(&mut self) {
        let loop_start = self.clock.millis();

        match self.state {
            State::IdentifyingMessage => self.identify_message(loop_start),
            State::ReadingMessage => self.read_message(loop_start),
            State::VerifyingCrc => self.verify_crc(),
            State::ProcessingAscii => self.process_ascii(loop_start),
            State::ProcessingBinary => self.process_binary(loop_start),
            State::Waiting => self.wait(loop_start),
            State::ErrorRecovery => self.recover(loop_start),
        }

        if self.options.secondary_p1 {
            self.source.flush();
        }
    }

    fn identify_message(&mut self, loop_start: u64) {
        if !self.source.available() {
            if loop_start.saturating_sub(self.times.identifying) > MAX_IDLE_MS {
                self.fail(P1Error::Idle(MAX_IDLE_MS / 1000));
            }
            return;
        }

        let byte = match self.get_byte() {
            Some(b) => b,
            None => return,
        };
        if byte != self.options.data_format.start_byte() {
            self.fail(P1Error::UnexpectedStartByte(byte));
            return;
        }
        if !self.message.try_push(byte) {
            self.fail(P1Error::BufferOverrun);
            return;
        }

        self.change_state(State::ReadingMessage);
        // Keep going, the rest of the telegram is already arriving
        self.read_message(loop_start);
    }

    fn read_message(&mut self, loop_start: u64) {
        self.times.message_loops += 1;

        while self.source.available() {
            let byte = match self.get_byte() {
                Some(b) => b,
                None => break,
            };
            if !self.message.try_push(byte) {
                self.fail(P1Error::BufferOverrun);
                return;
            }
            match framing::track_frame(self.options.data_format, self.message.as_slice(), &mut self.crc_position) {
                Ok(FrameStatus::Complete) => {
                    self.change_state(State::VerifyingCrc);
                    return;
                }
                Ok(FrameStatus::Incomplete) => {}
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }

        if loop_start.saturating_sub(self.times.reading) > MAX_MESSAGE_MS {
            self.fail(P1Error::IncompleteMessage(MAX_MESSAGE_MS / 1000));
        }
    }

    fn verify_crc(&mut self) {
        let format = self.options.data_format;
        if let Err(e) = framing::verify_checksum(format, self.message.as_slice(), self.crc_position) {
            framing::log_buffer(format, self.message.as_slice());
            self.fail(e);
            return;
        }
        debug!("CRC verification OK");

        match format {
            DataFormat::Ascii => self.change_state(State::ProcessingAscii),
            DataFormat::Binary => {
                if let Err(e) = framing::append_payload(self.message.as_slice(), self.crc_position, &mut self.dlms) {
                    self.fail(e);
                    return;
                }
                if framing::is_segmented(self.message.as_slice()) {
                    debug!("Segmented frame, {} bytes collected so far", self.dlms.len());
                    self.change_state(State::IdentifyingMessage);
                } else {
                    framing::log_buffer(format, self.dlms.as_slice());
                    self.change_state(State::ProcessingBinary);
                }
            }
        }
    }

    fn process_ascii(&mut self, loop_start: u64) {
        self.times.processing_loops += 1;

        loop {
            let step = self.ascii.next_line(self.message.as_slice());
            let last = step.last;
            match step.line {
                Some(AsciiLine::Obis { obis, value }) => {
                    self.tariff.observe(obis, value);
                    if !self.sensors.publish(obis, value) {
                        debug!("No sensor for {} ({})", format_obis(obis), value);
                    }
                }
                Some(AsciiLine::Text(line)) => {
                    if !self.text_sensors.publish_line(&line) {
                        debug!("No sensor matched line '{}'", line);
                    }
                }
                None => {}
            }

            if last {
                self.change_state(State::Waiting);
                return;
            }
            if self.clock.millis().saturating_sub(loop_start) >= PROCESSING_BUDGET_MS {
                return;
            }
        }
    }

    fn process_binary(&mut self, loop_start: u64) {
        self.times.processing_loops += 1;

        if self.dlms_header_pending {
            self.dlms_header_pending = false;
            let header = match dlms::unwrap_header(self.dlms.as_slice()) {
                Ok(h) => h,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            };
            if let Some(meter_time) = header.meter_time {
                if let Some(sensor) = self.text_sensors.find_prefix("metertime") {
                    sensor.publish_text(&meter_time);
                }
            }
            self.dlms_decoder.start(header.data_start);
        }

        loop {
            if self.dlms_decoder.cursor() >= self.dlms.len() {
                self.dlms.compact(self.dlms_decoder.cursor());
                self.change_state(State::Waiting);
                return;
            }

            match self.dlms_decoder.decode_item(self.dlms.as_slice(), &mut self.tariff) {
                Ok(Some(record)) => self.publish_record(record),
                Ok(None) => {}
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }

            if self.clock.millis().saturating_sub(loop_start) >= PROCESSING_BUDGET_MS {
                return;
            }
        }
    }

    fn publish_record(&self, record: DlmsRecord) {
        match record.value {
            RecordValue::Number(value) => {
                debug!("{} = {} {}", format_obis(record.obis), value, unit_to_string(record.unit));
                if !self.sensors.publish(record.obis, value) {
                    debug!("No sensor for {}", format_obis(record.obis));
                }
            }
            RecordValue::Text(text) => {
                debug!("{} = '{}'", format_obis(record.obis), text);
                if !self.text_sensors.publish_obis(record.obis, &text) {
                    debug!("No text sensor for {}", format_obis(record.obis));
                }
            }
        }
    }

    fn wait(&mut self, loop_start: u64) {
        if self.times.display {
            self.times.display = false;
            self.log_cycle_times();

            if let Some(tariff) = self.tariff.infer() {
                debug!("Active tariff inferred as {}", tariff);
                self.sensors.publish(OBIS_ACTIVE_TARIFF, tariff as f64);
            }
        }

        let min_period = self.options.min_period_ms as u64;
        if min_period == 0 || loop_start.saturating_sub(self.times.identifying) > min_period {
            self.change_state(State::IdentifyingMessage);
        } else if self.source.available() {
            self.fail(P1Error::Unsolicited);
        }
    }

    fn recover(&mut self, loop_start: u64) {
        if self.source.available() {
            let mut discarded = 0;
            while discarded < MAX_DISCARD_PER_CYCLE && self.source.available() {
                match self.get_byte() {
                    Some(b) => self.discard_log.add_byte(b),
                    None => break,
                }
                discarded += 1;
            }
            self.times.error_recovery = loop_start;
        } else if loop_start.saturating_sub(self.times.error_recovery) > QUIET_PERIOD_MS {
            self.change_state(State::Waiting);
            self.discard_log.flush();
        }
    }

    fn get_byte(&mut self) -> Option<u8> {
        let byte = self.source.read_byte()?;
        if self.options.secondary_p1 {
            self.source.write_byte(byte);
        }
        Some(byte)
    }

    fn fail(&mut self, e: P1Error) {
        match e {
            P1Error::Unsolicited => error!("{}", e),
            _ => warn!("{}. Resetting.", e),
        }
        self.change_state(State::ErrorRecovery);
    }

    fn log_cycle_times(&mut self) {
        let t = &self.times;
        let stats = format!(
            "Cycle times: Identifying = {} ms, Message = {} ms ({} loops), Verifying = {} ms, Processing = {} ms ({} loops), (Total = {} ms). {} bytes in buffer",
            t.reading.saturating_sub(t.identifying),
            t.verifying.saturating_sub(t.reading),
            t.message_loops,
            t.processing.saturating_sub(t.verifying),
            t.waiting.saturating_sub(t.processing),
            t.processing_loops,
            t.waiting.saturating_sub(t.identifying),
            self.message.len()
        );

        self.times.counter = self.times.counter.wrapping_add(1);
        let interval = self.options.time_stats_info_interval;
        if interval != 0 && self.times.counter % interval == 0 {
            info!("{}", stats);
        } else {
            debug!("{}", stats);
        }
    }

    fn change_state(&mut self, new_state: State) {
        let now = self.clock.millis();

        match new_state {
            State::IdentifyingMessage => {
                self.times.identifying = now;
                self.times.message_loops = 0;
                self.times.processing_loops = 0;
                self.message.clear();
                self.crc_position = 0;
                self.triggers.fire_ready_to_receive();
            }
            State::ReadingMessage => {
                self.times.reading = now;
                self.triggers.fire_receiving_update();
            }
            State::VerifyingCrc => {
                self.times.verifying = now;
                self.triggers.fire_update_received();
            }
            State::ProcessingAscii => {
                self.times.processing = now;
                self.ascii.start();
                self.tariff.begin_telegram();
            }
            State::ProcessingBinary => {
                self.times.processing = now;
                self.dlms_header_pending = true;
                self.tariff.begin_telegram();
            }
            State::Waiting => {
                self.times.waiting = now;
                if self.state != State::ErrorRecovery {
                    self.times.display = true;
                }
                if matches!(self.state, State::ProcessingAscii | State::ProcessingBinary) {
                    self.triggers.fire_update_processed();
                }
            }
            State::ErrorRecovery => {
                self.times.error_recovery = now;
                self.dlms.clear();
                self.triggers.fire_communication_error();
            }
        }

        self.state = new_state;
    }
}
