use p1meter::{
    config::{ConfigError, P1Config},
    obis_utils::{get_obis_description, obis_from_str},
    sensors::{ChannelSensor, ChannelTextSensor, Reading},
    ChannelSource, P1Reader, ReaderOptions, State,
};
use std::{env, io, path::Path, rc::Rc, time::Duration};
use log::{debug, error, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn load_config() -> Result<P1Config, ConfigError> {
    match env::args().nth(1) {
        Some(path) => P1Config::load(Path::new(&path)),
        None => match P1Config::locate() {
            Err(ConfigError::NotFound(tried)) => {
                warn!("No config found (tried {}), running with defaults", tried);
                Ok(P1Config::default())
            }
            other => other,
        },
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    // Initialize logging
    let default_filter = env::var("P1_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let config = load_config().map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let (byte_tx, byte_rx) = mpsc::channel::<Vec<u8>>(64);
    let (reading_tx, mut reading_rx) = mpsc::channel::<Reading>(256);
    let mut threads: Vec<JoinHandle<()>> = Vec::new();

    /* Raw meter bytes come in on stdin */
    threads.push(tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut chunk = vec![0u8; 512];
        loop {
            match stdin.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if byte_tx.send(chunk[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Reading input failed: {}", e);
                    break;
                }
            }
        }
        info!("Input closed");
    }));

    /* Forward every byte to a secondary P1 device if configured */
    let echo = match (config.secondary_p1, &config.secondary_path) {
        (true, Some(path)) => {
            let mut file = BufWriter::new(tokio::fs::File::create(path).await?);
            /* One chunk per reader step, unbounded so no echoed byte is dropped */
            let (echo_tx, mut echo_rx) = mpsc::unbounded_channel::<Vec<u8>>();
            threads.push(tokio::spawn(async move {
                while let Some(bytes) = echo_rx.recv().await {
                    if let Err(e) = file.write_all(&bytes).await {
                        error!("Passthrough write failed: {}", e);
                        break;
                    }
                    if let Err(e) = file.flush().await {
                        error!("Passthrough flush failed: {}", e);
                        break;
                    }
                }
                let _ = file.flush().await;
            }));
            Some(echo_tx)
        }
        (true, None) => {
            warn!("secondary_p1 is set without secondary_path, passthrough disabled");
            None
        }
        _ => None,
    };

    /* One JSON object per published value on stdout */
    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(reading) = reading_rx.recv().await {
            match serde_json::to_string(&reading) {
                Ok(line) => {
                    if stdout.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                        break;
                    }
                    let _ = stdout.flush().await;
                }
                Err(e) => error!("Unable to serialize reading: {}", e),
            }
        }
    });

    let mut reader = P1Reader::new(ChannelSource::new(byte_rx, echo), ReaderOptions::from(&config));
    for s in &config.sensors {
        let obis = obis_from_str(&s.obis_code);
        debug!("Sensor {} on {} ({})", s.name, s.obis_code, get_obis_description(obis).unwrap_or("unknown quantity"));
        let sensor = ChannelSensor::new(&s.name, obis, s.multiplier, reading_tx.clone());
        reader.register_sensor(&s.obis_code, Rc::new(sensor));
    }
    for t in &config.text_sensors {
        let sensor = ChannelTextSensor::new(&t.name, &t.identifier, reading_tx.clone());
        reader.register_text_sensor(&t.identifier, Rc::new(sensor));
    }
    drop(reading_tx);

    info!(
        "Reading {:?} telegrams with {} sensors and {} text sensors",
        config.data_format,
        reader.sensors().len(),
        reader.text_sensors().len()
    );

    let mut interval = tokio::time::interval(Duration::from_millis(config.loop_interval_ms));
    loop {
        interval.tick().await;
        reader.advance();

        let idle = matches!(reader.state(), State::Waiting | State::IdentifyingMessage);
        if idle && reader.source_mut().is_finished() {
            break;
        }
    }

    info!("All input processed, shutting down");
    drop(reader);
    for task in threads {
        let _ = task.await;
    }
    let _ = printer.await;
    Ok(())
}
