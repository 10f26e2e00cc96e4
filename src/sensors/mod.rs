use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, warn};
use serde::Serialize;
use tokio::sync::mpsc::Sender;

use crate::obis_utils::{self, obis_from_str, OBIS_ERROR};

/// Receives numeric values decoded for one OBIS code.
pub trait Sensor {
    fn publish_val(&self, value: f64);
}

/// Receives textual values, either a whole ASCII line or a DLMS octet string.
pub trait TextSensor {
    fn publish_text(&self, value: &str);
}

#[derive(Default)]
pub struct SensorRegistry {
    sensors: HashMap<u32, Rc<dyn Sensor>>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A later registration under the same key replaces the earlier one.
    pub fn register(&mut self, obis: u32, sensor: Rc<dyn Sensor>) {
        self.sensors.insert(obis, sensor);
    }

    /// Registers under the parsed key. Codes that do not parse are reported
    /// and kept under OBIS_ERROR, so they never receive anything.
    pub fn register_code(&mut self, obis_code: &str, sensor: Rc<dyn Sensor>) -> u32 {
        let obis = obis_from_str(obis_code);
        if obis == OBIS_ERROR {
            warn!("Not a valid OBIS code: '{}'", obis_code);
        }
        self.register(obis, sensor);
        obis
    }

    /// Returns true when a sensor was registered for the code.
    pub fn publish(&self, obis: u32, value: f64) -> bool {
        if obis == OBIS_ERROR {
            return false;
        }
        match self.sensors.get(&obis) {
            Some(sensor) => {
                sensor.publish_val(value);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

struct TextEntry {
    identifier: String,
    sensor: Rc<dyn TextSensor>,
}

#[derive(Default)]
pub struct TextSensorRegistry {
    // Keep sorted so longer identifiers are first
    by_identifier: Vec<TextEntry>,
    by_obis: HashMap<u32, Rc<dyn TextSensor>>,
}

impl TextSensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, identifier: &str, sensor: Rc<dyn TextSensor>) {
        let position = self
            .by_identifier
            .iter()
            .position(|entry| identifier.len() >= entry.identifier.len())
            .unwrap_or(self.by_identifier.len());

        self.by_identifier.insert(position, TextEntry {
            identifier: identifier.to_string(),
            sensor: sensor.clone(),
        });

        let obis = obis_from_str(identifier);
        if obis != OBIS_ERROR {
            self.by_obis.insert(obis, sensor);
        } else {
            debug!("Text sensor '{}' is matched by prefix only", identifier);
        }
    }

    /// First registered identifier that `line` starts with, longest first.
    pub fn find_prefix(&self, line: &str) -> Option<&Rc<dyn TextSensor>> {
        self.by_identifier
            .iter()
            .find(|entry| line.starts_with(entry.identifier.as_str()))
            .map(|entry| &entry.sensor)
    }

    pub fn publish_line(&self, line: &str) -> bool {
        match self.find_prefix(line) {
            Some(sensor) => {
                sensor.publish_text(line);
                true
            }
            None => false,
        }
    }

    pub fn publish_obis(&self, obis: u32, value: &str) -> bool {
        match self.by_obis.get(&obis) {
            Some(sensor) => {
                sensor.publish_text(value);
                true
            }
            None => false,
        }
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.by_identifier.iter().map(|entry| entry.identifier.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_identifier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identifier.is_empty()
    }
}

type Listener = Box<dyn FnMut()>;

/// Lifecycle notification points of the reader.
#[derive(Default)]
pub struct Triggers {
    ready_to_receive: Vec<Listener>,
    receiving_update: Vec<Listener>,
    update_received: Vec<Listener>,
    update_processed: Vec<Listener>,
    communication_error: Vec<Listener>,
}

impl Triggers {
    pub fn on_ready_to_receive(&mut self, listener: impl FnMut() + 'static) {
        self.ready_to_receive.push(Box::new(listener));
    }

    pub fn on_receiving_update(&mut self, listener: impl FnMut() + 'static) {
        self.receiving_update.push(Box::new(listener));
    }

    pub fn on_update_received(&mut self, listener: impl FnMut() + 'static) {
        self.update_received.push(Box::new(listener));
    }

    pub fn on_update_processed(&mut self, listener: impl FnMut() + 'static) {
        self.update_processed.push(Box::new(listener));
    }

    pub fn on_communication_error(&mut self, listener: impl FnMut() + 'static) {
        self.communication_error.push(Box::new(listener));
    }

    pub(crate) fn fire_ready_to_receive(&mut self) {
        self.ready_to_receive.iter_mut().for_each(|l| l());
    }

    pub(crate) fn fire_receiving_update(&mut self) {
        self.receiving_update.iter_mut().for_each(|l| l());
    }

    pub(crate) fn fire_update_received(&mut self) {
        self.update_received.iter_mut().for_each(|l| l());
    }

    pub(crate) fn fire_update_processed(&mut self) {
        self.update_processed.iter_mut().for_each(|l| l());
    }

    pub(crate) fn fire_communication_error(&mut self) {
        self.communication_error.iter_mut().for_each(|l| l());
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Text(String),
}

/// One published value as handed to the output side of the binary.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Reading {
    pub name: String,
    pub obis: String,
    pub value: ReadingValue,
    pub timestamp: i64,
}

/// Numeric consumer forwarding scaled values into a channel.
pub struct ChannelSensor {
    name: String,
    obis: u32,
    multiplier: f64,
    sender: Sender<Reading>,
}

impl ChannelSensor {
    pub fn new(name: &str, obis: u32, multiplier: f64, sender: Sender<Reading>) -> Self {
        Self { name: name.to_string(), obis, multiplier, sender }
    }
}

impl Sensor for ChannelSensor {
    fn publish_val(&self, value: f64) {
        let reading = Reading {
            name: self.name.clone(),
            obis: obis_utils::format_obis(self.obis),
            value: ReadingValue::Number(value * self.multiplier),
            timestamp: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = self.sender.try_send(reading) {
            warn!("Dropping value for {}: {}", self.name, e);
        }
    }
}

pub struct ChannelTextSensor {
    name: String,
    identifier: String,
    sender: Sender<Reading>,
}

impl ChannelTextSensor {
    pub fn new(name: &str, identifier: &str, sender: Sender<Reading>) -> Self {
        Self { name: name.to_string(), identifier: identifier.to_string(), sender }
    }
}

impl TextSensor for ChannelTextSensor {
    fn publish_text(&self, value: &str) {
        let reading = Reading {
            name: self.name.clone(),
            obis: self.identifier.clone(),
            value: ReadingValue::Text(value.to_string()),
            timestamp: chrono::Utc::now().timestamp(),
        };
        if let Err(e) = self.sender.try_send(reading) {
            warn!("Dropping text for {}: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obis_utils::obis;
    use std::cell::RefCell;

    struct Recorder(RefCell<Vec<String>>, &'static str);

    impl TextSensor for Recorder {
        fn publish_text(&self, value: &str) {
            self.0.borrow_mut().push(format!("{}:{}", self.1, value));
        }
    }

    struct Numbers(RefCell<Vec<f64>>);

    impl Sensor for Numbers {
        fn publish_val(&self, value: f64) {
            self.0.borrow_mut().push(value);
        }
    }

    #[test]
    fn test_sensor_registry_publish() {
        let mut registry = SensorRegistry::new();
        let sensor = Rc::new(Numbers(RefCell::new(Vec::new())));
        registry.register(obis(1, 8, 1), sensor.clone());

        assert!(registry.publish(obis(1, 8, 1), 12.5));
        assert!(!registry.publish(obis(1, 8, 2), 1.0));
        assert_eq!(*sensor.0.borrow(), vec![12.5]);
    }

    #[test]
    fn test_invalid_code_never_matches() {
        let mut registry = SensorRegistry::new();
        let sensor = Rc::new(Numbers(RefCell::new(Vec::new())));
        assert_eq!(registry.register_code("1-0:1.8.1", sensor.clone()), OBIS_ERROR);
        assert!(!registry.publish(OBIS_ERROR, 1.0));
        assert!(sensor.0.borrow().is_empty());
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = SensorRegistry::new();
        let first = Rc::new(Numbers(RefCell::new(Vec::new())));
        let second = Rc::new(Numbers(RefCell::new(Vec::new())));
        registry.register(obis(1, 7, 0), first.clone());
        registry.register(obis(1, 7, 0), second.clone());
        registry.publish(obis(1, 7, 0), 3.0);
        assert!(first.0.borrow().is_empty());
        assert_eq!(*second.0.borrow(), vec![3.0]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_text_registry_orders_longest_first() {
        let mut registry = TextSensorRegistry::new();
        registry.register("0-0", Rc::new(Recorder(RefCell::new(Vec::new()), "short")));
        registry.register("0-0:96.1.1", Rc::new(Recorder(RefCell::new(Vec::new()), "long")));
        registry.register("0-0:96", Rc::new(Recorder(RefCell::new(Vec::new()), "mid")));

        let order: Vec<&str> = registry.identifiers().collect();
        assert_eq!(order, vec!["0-0:96.1.1", "0-0:96", "0-0"]);
    }

    #[test]
    fn test_text_registry_longest_prefix_match() {
        let mut registry = TextSensorRegistry::new();
        let short = Rc::new(Recorder(RefCell::new(Vec::new()), "short"));
        let long = Rc::new(Recorder(RefCell::new(Vec::new()), "long"));
        registry.register("0-0", short.clone());
        registry.register("0-0:96.1.1", long.clone());

        assert!(registry.publish_line("0-0:96.1.1(4530303334)"));
        assert!(registry.publish_line("0-0:1.0.0(210101120000W)"));
        assert!(!registry.publish_line("1-0:99.97.0(0)"));

        assert_eq!(*long.0.borrow(), vec!["long:0-0:96.1.1(4530303334)".to_string()]);
        assert_eq!(*short.0.borrow(), vec!["short:0-0:1.0.0(210101120000W)".to_string()]);
    }

    #[test]
    fn test_text_registry_obis_view() {
        let mut registry = TextSensorRegistry::new();
        let sensor = Rc::new(Recorder(RefCell::new(Vec::new()), "id"));
        registry.register("96.1.0", sensor.clone());
        registry.register("metertime", Rc::new(Recorder(RefCell::new(Vec::new()), "time")));

        assert!(registry.publish_obis(obis(96, 1, 0), "ABC123"));
        assert!(!registry.publish_obis(obis(96, 1, 1), "nope"));
        assert_eq!(*sensor.0.borrow(), vec!["id:ABC123".to_string()]);
    }

    #[test]
    fn test_triggers_fire_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut triggers = Triggers::default();
        let (a, b) = (log.clone(), log.clone());
        triggers.on_communication_error(move || a.borrow_mut().push(1));
        triggers.on_communication_error(move || b.borrow_mut().push(2));
        triggers.fire_communication_error();
        triggers.fire_ready_to_receive();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_channel_sensor_applies_multiplier() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let sensor = ChannelSensor::new("power", obis(1, 7, 0), 1000.0, tx);
        sensor.publish_val(1.5);
        let reading = rx.try_recv().unwrap();
        assert_eq!(reading.name, "power");
        assert_eq!(reading.obis, "1.7.0");
        assert_eq!(reading.value, ReadingValue::Number(1500.0));
    }
}
