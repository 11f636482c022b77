// Auxiliary raw sample stream: fixed-width binary doubles exchanged at a
// steady cadence to probe transport latency and throughput. Independent of
// the line protocol, and recoverable by design: any transport error is
// logged, followed by a fixed pause and a reconnect.

use crate::error::BridgeError;
use crate::pipe::{Channel, ConnectOptions, Direction, PipeName, Role};
use log::{info, warn};
use std::time::Duration;

pub const SAMPLE_WIDTH: usize = 8;
pub const SAMPLE_PERIOD: Duration = Duration::from_millis(10);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

// The reference generator starts its counter here.
const WAVEFORM_START: i64 = -100;

/// Triangular test waveform: `0.01 * (n mod 200)`, sign flipped on even n.
/// Euclidean modulo keeps the magnitude positive for negative counters.
pub fn waveform(n: i64) -> f64 {
    let magnitude = 0.01 * n.rem_euclid(200) as f64;
    if n % 2 != 0 {
        magnitude
    } else {
        -magnitude
    }
}

/// Write one native-endian sample.
pub async fn write_sample(channel: &mut Channel, value: f64) -> Result<(), BridgeError> {
    channel.write_all(&value.to_ne_bytes()).await
}

/// Read exactly one native-endian sample.
pub async fn read_sample(channel: &mut Channel) -> Result<f64, BridgeError> {
    let mut buf = [0u8; SAMPLE_WIDTH];
    channel.read_exact(&mut buf).await?;
    Ok(f64::from_ne_bytes(buf))
}

/// Emit `count` waveform samples starting at counter `start`, one every
/// `SAMPLE_PERIOD`. Returns the counter value after the last sample.
pub async fn stream_samples(
    channel: &mut Channel,
    start: i64,
    count: usize,
) -> Result<i64, BridgeError> {
    let mut n = start;
    for _ in 0..count {
        write_sample(channel, waveform(n)).await?;
        tokio::time::sleep(SAMPLE_PERIOD).await;
        n += 1;
    }
    Ok(n)
}

/// Read `count` samples.
pub async fn drain_samples(channel: &mut Channel, count: usize) -> Result<Vec<f64>, BridgeError> {
    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        samples.push(read_sample(channel).await?);
    }
    Ok(samples)
}

/// Waveform producer with the reconnect loop: on any transport error the
/// channel is dropped, and after the reconnect pause the endpoint
/// re-listens (server) or re-dials (client). Runs forever unless a session
/// limit is set.
pub struct SampleProducer {
    name: PipeName,
    role: Role,
    options: ConnectOptions,
    reconnect_delay: Duration,
    max_sessions: Option<usize>,
}

impl SampleProducer {
    pub fn new(name: PipeName, role: Role, options: ConnectOptions) -> Self {
        Self {
            name,
            role,
            options,
            reconnect_delay: RECONNECT_DELAY,
            max_sessions: None,
        }
    }

    /// Pause between a lost connection and the next attempt (default 1 s).
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Return after this many completed connections instead of looping
    /// forever.
    pub fn max_sessions(mut self, sessions: usize) -> Self {
        self.max_sessions = Some(sessions);
        self
    }

    pub async fn run(&self) {
        let mut sessions = 0usize;
        loop {
            let mut channel =
                match Channel::open(&self.name, Direction::Write, self.role, &self.options).await {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!("[SAMPLER] Open of '{}' failed: {}", self.name, e);
                        tokio::time::sleep(self.reconnect_delay).await;
                        continue;
                    }
                };
            sessions += 1;
            info!("[SAMPLER] Producing on '{}'", self.name);

            let mut n = WAVEFORM_START;
            loop {
                if let Err(e) = write_sample(&mut channel, waveform(n)).await {
                    warn!("[SAMPLER] Write failed: {}", e);
                    break;
                }
                tokio::time::sleep(SAMPLE_PERIOD).await;
                n += 1;
            }

            if let Err(e) = channel.close().await {
                warn!("[SAMPLER] Close after write failure: {}", e);
            }
            if self.max_sessions.is_some_and(|limit| sessions >= limit) {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}

/// Sample consumer with the same reconnect behavior.
pub struct SampleConsumer {
    name: PipeName,
    role: Role,
    options: ConnectOptions,
    reconnect_delay: Duration,
    max_sessions: Option<usize>,
}

impl SampleConsumer {
    pub fn new(name: PipeName, role: Role, options: ConnectOptions) -> Self {
        Self {
            name,
            role,
            options,
            reconnect_delay: RECONNECT_DELAY,
            max_sessions: None,
        }
    }

    /// Pause between a lost connection and the next attempt (default 1 s).
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Return after this many completed connections instead of looping
    /// forever.
    pub fn max_sessions(mut self, sessions: usize) -> Self {
        self.max_sessions = Some(sessions);
        self
    }

    pub async fn run(&self, mut on_sample: impl FnMut(f64)) {
        let mut sessions = 0usize;
        loop {
            let mut channel =
                match Channel::open(&self.name, Direction::Read, self.role, &self.options).await {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!("[SAMPLER] Open of '{}' failed: {}", self.name, e);
                        tokio::time::sleep(self.reconnect_delay).await;
                        continue;
                    }
                };
            sessions += 1;
            info!("[SAMPLER] Consuming from '{}'", self.name);

            loop {
                match read_sample(&mut channel).await {
                    Ok(value) => on_sample(value),
                    Err(e) => {
                        warn!("[SAMPLER] Read failed: {}", e);
                        break;
                    }
                }
            }

            if let Err(e) = channel.close().await {
                warn!("[SAMPLER] Close after read failure: {}", e);
            }
            if self.max_sessions.is_some_and(|limit| sessions >= limit) {
                return;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }
}
