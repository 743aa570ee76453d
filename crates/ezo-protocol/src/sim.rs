//! Simulated Transducer
//!
//! A host-side stand-in for an EZO conductivity circuit. It implements
//! `AsyncWrite`: every complete command written to it is answered by
//! appending reply lines to the client's receive buffer, the way the real
//! device's bytes would arrive through the serial receive path.

use crate::calibration::LINE_COUNT;
use crate::client::EzoClient;
use crate::error::EzoError;
use crate::link::Connector;
use crate::transport::{LineTransport, TERMINATOR};
use crate::FACTORY_BAUD_RATE;
use ring_buffer::LineBuffer;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tracing::trace;

/// Firmware version reported by `i`
const SIM_FIRMWARE: &str = "2.16";

/// Device state shared between the simulated link and its handle
#[derive(Debug)]
struct SimState {
    /// Baud rate the simulated device listens on
    baud_rate: u32,
    /// Readings returned by `R`, cycled
    readings: Vec<String>,
    next_reading: usize,
    k_value: String,
    continuous: bool,
    led: bool,
    calibration_points: u8,
    calibration: Vec<String>,
    /// Lines received by `Import` so far
    import_buffer: Vec<String>,
    /// Position of the running `Export` sequence
    export_cursor: Option<usize>,
    /// One-shot scripted replies
    overrides: VecDeque<(String, Vec<String>)>,
    /// Every command received, in order
    log: Vec<String>,
}

impl SimState {
    fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            readings: vec!["0.00".to_string()],
            next_reading: 0,
            k_value: "1.0".to_string(),
            continuous: true,
            led: true,
            calibration_points: 0,
            calibration: generated_calibration(0, "1.0"),
            import_buffer: Vec::new(),
            export_cursor: None,
            overrides: VecDeque::new(),
            log: Vec::new(),
        }
    }

    fn reply(&mut self, command: &str) -> Vec<String> {
        self.log.push(command.to_string());

        if let Some(pos) = self.overrides.iter().position(|(c, _)| c == command) {
            if let Some((_, lines)) = self.overrides.remove(pos) {
                return lines;
            }
        }

        let (name, argument) = match command.split_once(',') {
            Some((name, argument)) => (name, Some(argument)),
            None => (command, None),
        };
        if name != "Export" {
            self.export_cursor = None;
        }

        match (name, argument) {
            ("", None) => ok(),
            ("i", None) => vec![format!("?I,EC,{}", SIM_FIRMWARE), ok_line()],
            ("R", None) => {
                let reading = self.readings[self.next_reading % self.readings.len()].clone();
                self.next_reading += 1;
                vec![reading, ok_line()]
            }
            ("K", Some(value)) => {
                self.k_value = value.to_string();
                ok()
            }
            ("Baud", Some(value)) => match value.parse() {
                Ok(baud_rate) => {
                    self.baud_rate = baud_rate;
                    ok()
                }
                Err(_) => error(),
            },
            ("C", Some(flag @ ("0" | "1"))) => {
                self.continuous = flag == "1";
                ok()
            }
            ("L", Some(flag @ ("0" | "1"))) => {
                self.led = flag == "1";
                ok()
            }
            ("Cal", Some("?")) => vec![format!("?CAL,{}", self.calibration_points), ok_line()],
            ("Cal", Some("dry")) => {
                self.recalibrate(0);
                ok()
            }
            ("Cal", Some(point)) if point.starts_with("low,") => {
                self.recalibrate(1);
                ok()
            }
            ("Cal", Some(point)) if point.starts_with("high,") => {
                self.recalibrate(2);
                ok()
            }
            ("Import", Some(line)) => {
                self.import_buffer.push(line.to_string());
                if self.import_buffer.len() < LINE_COUNT {
                    return ok();
                }
                self.calibration = std::mem::take(&mut self.import_buffer);
                vec![ok_line(), "*RS".to_string(), "*RE".to_string()]
            }
            ("Export", None) => {
                let cursor = self.export_cursor.unwrap_or(0);
                match self.calibration.get(cursor) {
                    Some(line) => {
                        let line = line.clone();
                        self.export_cursor = Some(cursor + 1);
                        vec![line, ok_line()]
                    }
                    None => {
                        self.export_cursor = None;
                        vec!["*DONE".to_string(), ok_line()]
                    }
                }
            }
            ("Factory", None) => {
                let baud_rate = self.baud_rate;
                let readings = std::mem::take(&mut self.readings);
                let overrides = std::mem::take(&mut self.overrides);
                let log = std::mem::take(&mut self.log);
                *self = Self::new(baud_rate);
                self.readings = readings;
                self.overrides = overrides;
                self.log = log;
                vec![ok_line(), "*RS".to_string(), "*RE".to_string()]
            }
            _ => error(),
        }
    }

    fn recalibrate(&mut self, points: u8) {
        self.calibration_points = points;
        self.calibration = generated_calibration(points, &self.k_value);
    }
}

fn ok_line() -> String {
    "*OK".to_string()
}

fn ok() -> Vec<String> {
    vec![ok_line()]
}

fn error() -> Vec<String> {
    vec!["*ER".to_string()]
}

/// Deterministic 12-character export lines for a calibration state
fn generated_calibration(points: u8, k_value: &str) -> Vec<String> {
    let seed = k_value
        .bytes()
        .fold(u32::from(points) * 7919, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
    (0..LINE_COUNT)
        .map(|index| format!("{:04X}{:08X}", index, seed.wrapping_mul(index as u32 + 1)))
        .collect()
}

/// Write side of a simulated serial link
pub struct SimProbe {
    /// Receive buffer of the connected client
    rx: Arc<LineBuffer>,
    state: Arc<Mutex<SimState>>,
    /// Held while this link is open; the device allows one at a time
    link: Arc<AtomicBool>,
    /// Baud rate this link was opened with
    link_baud: u32,
    /// Bytes of the command being written
    pending: Vec<u8>,
}

impl SimProbe {
    /// Create a simulated device replying into `rx`
    pub fn new(rx: Arc<LineBuffer>) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState::new(FACTORY_BAUD_RATE)));
        let link = Arc::new(AtomicBool::new(true));
        let probe = Self {
            rx,
            state: Arc::clone(&state),
            link: Arc::clone(&link),
            link_baud: FACTORY_BAUD_RATE,
            pending: Vec::new(),
        };
        (probe, SimHandle { state, link })
    }

    /// Client connected to a fresh simulated device
    pub fn client() -> (EzoClient<SimProbe>, SimHandle) {
        let rx = Arc::new(LineBuffer::with_default_capacity());
        let (probe, handle) = Self::new(Arc::clone(&rx));
        let client = EzoClient::new(LineTransport::new(probe, rx), FACTORY_BAUD_RATE);
        (client, handle)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete_command(&mut self) {
        let command = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();

        let mut state = self.lock();
        if state.baud_rate != self.link_baud {
            // Wrong line speed: the device only sees garbage
            trace!("Simulated probe at {} baud ignored {:?}", state.baud_rate, command);
            return;
        }
        let replies = state.reply(&command);
        drop(state);

        for line in replies {
            self.rx.extend(line.as_bytes());
            self.rx.push(TERMINATOR);
        }
    }
}

impl Drop for SimProbe {
    fn drop(&mut self) {
        self.link.store(false, Ordering::SeqCst);
    }
}

impl AsyncWrite for SimProbe {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        for &byte in buf {
            if byte == TERMINATOR {
                this.complete_command();
            } else {
                this.pending.push(byte);
            }
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Inspection and scripting handle for a simulated device
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
    link: Arc<AtomicBool>,
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Readings returned by successive `R` commands (cycled)
    pub fn set_readings(&self, readings: &[&str]) {
        let mut state = self.lock();
        state.readings = readings.iter().map(|r| r.to_string()).collect();
        if state.readings.is_empty() {
            state.readings.push("0.00".to_string());
        }
        state.next_reading = 0;
    }

    /// Answer the next occurrence of exactly `command` with `lines`
    /// instead of the normal reply
    pub fn respond(&self, command: &str, lines: &[&str]) {
        let lines = lines.iter().map(|l| l.to_string()).collect();
        self.lock().overrides.push_back((command.to_string(), lines));
    }

    /// Replace the device's stored calibration lines
    pub fn set_calibration(&self, lines: &[&str]) {
        self.lock().calibration = lines.iter().map(|l| l.to_string()).collect();
    }

    /// Calibration lines currently held by the device
    pub fn calibration_lines(&self) -> Vec<String> {
        self.lock().calibration.clone()
    }

    /// Number of calibration points the device holds
    pub fn calibration_points(&self) -> u8 {
        self.lock().calibration_points
    }

    /// Last K-value received
    pub fn k_value(&self) -> String {
        self.lock().k_value.clone()
    }

    /// Whether continuous reporting is on
    pub fn continuous(&self) -> bool {
        self.lock().continuous
    }

    /// Whether the indicator LED is on
    pub fn led(&self) -> bool {
        self.lock().led
    }

    /// Baud rate the device listens on
    pub fn baud_rate(&self) -> u32 {
        self.lock().baud_rate
    }

    /// Force the device's baud rate
    pub fn set_baud_rate(&self, baud_rate: u32) {
        self.lock().baud_rate = baud_rate;
    }

    /// Every command received so far
    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Whether a link to the device is currently open
    pub fn link_open(&self) -> bool {
        self.link.load(Ordering::SeqCst)
    }

    /// Connector opening new links to this same device
    pub fn connector(&self) -> SimConnector {
        SimConnector {
            state: Arc::clone(&self.state),
            link: Arc::clone(&self.link),
        }
    }
}

/// Opens simulated links to one shared device.
///
/// Like a tty opened for exclusive access, a second link cannot be opened
/// while another one is still alive.
#[derive(Clone)]
pub struct SimConnector {
    state: Arc<Mutex<SimState>>,
    link: Arc<AtomicBool>,
}

impl SimConnector {
    /// Connector for a new simulated device listening at `baud_rate`
    pub fn new(baud_rate: u32) -> (Self, SimHandle) {
        let state = Arc::new(Mutex::new(SimState::new(baud_rate)));
        let link = Arc::new(AtomicBool::new(false));
        let handle = SimHandle {
            state: Arc::clone(&state),
            link: Arc::clone(&link),
        };
        (Self { state, link }, handle)
    }
}

impl Connector for SimConnector {
    type Writer = SimProbe;

    fn connect(&mut self, baud_rate: u32) -> Result<EzoClient<SimProbe>, EzoError> {
        if self.link.swap(true, Ordering::SeqCst) {
            return Err(EzoError::SerialError(
                "Unable to acquire exclusive lock on serial port".to_string(),
            ));
        }
        let rx = Arc::new(LineBuffer::with_default_capacity());
        let probe = SimProbe {
            rx: Arc::clone(&rx),
            state: Arc::clone(&self.state),
            link: Arc::clone(&self.link),
            link_baud: baud_rate,
            pending: Vec::new(),
        };
        Ok(EzoClient::new(LineTransport::new(probe, rx), baud_rate))
    }
}
