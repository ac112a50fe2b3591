//! In-memory modem and manual clock shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::Result;
use crate::port::Port;

/// How far the manual clock moves on each read that finds no data.
pub const POLL_STEP: Duration = Duration::from_millis(10);

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default)]
struct ClockState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            state: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.state.lock().unwrap()
    }

    pub fn advance(&self, duration: Duration) {
        self.lock().elapsed += duration;
    }

    /// Every duration passed to `sleep`, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.lock().elapsed
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

/// Scripted response: text segments released at offsets from the command.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    segments: Vec<(Duration, Vec<u8>)>,
}

impl Reply {
    pub fn text(text: &str) -> Self {
        Self::after(Duration::ZERO, text)
    }

    pub fn after(delay: Duration, text: &str) -> Self {
        Self {
            segments: vec![(delay, text.as_bytes().to_vec())],
        }
    }

    pub fn ok() -> Self {
        Self::text("OK\r\n")
    }

    #[must_use]
    pub fn then(mut self, delay: Duration, text: &str) -> Self {
        self.segments.push((delay, text.as_bytes().to_vec()));
        self
    }
}

type Handler = Box<dyn FnMut(usize) -> Option<Reply> + Send>;

#[derive(Default)]
struct ModemState {
    handlers: HashMap<String, Handler>,
    calls: HashMap<String, usize>,
    pending: VecDeque<(Instant, Vec<u8>)>,
    line: Vec<u8>,
    download_remaining: Option<usize>,
    upload_ack: Option<Reply>,
    commands: Vec<String>,
    raw_writes: Vec<Vec<u8>>,
    data_writes: Vec<Vec<u8>>,
    fail_data_write: Option<usize>,
    fail_reads: bool,
    closes: usize,
    closed: bool,
}

/// Scripted SARA modem.
///
/// Cloning yields another handle to the same modem, so a test can keep one
/// handle for inspection while the session owns the other.
#[derive(Clone)]
pub struct MockModem {
    clock: ManualClock,
    state: Arc<Mutex<ModemState>>,
}

impl MockModem {
    pub fn new(clock: ManualClock) -> Self {
        let state = ModemState {
            upload_ack: Some(Reply::ok()),
            ..ModemState::default()
        };
        Self {
            clock,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Modem that answers the whole update sequence.
    pub fn sara(clock: ManualClock) -> Self {
        let modem = Self::new(clock);
        modem.on("AT", Reply::text("AT\r\r\nOK\r\n"));
        modem.on_call("ATI9", |n| {
            let version = if n == 0 {
                "L0.0.00.00.05.06,A.02.00"
            } else {
                "L0.0.00.00.05.08,A.02.04"
            };
            Some(Reply::text(&format!("ATI9\r\r\n{version}\r\n\r\nOK\r\n")))
        });
        modem.on("AT+ULSTFILE", Reply::text("\r\n+ULSTFILE: \r\n\r\nOK\r\n"));
        modem.on_prefix_download(Reply::text("\r\n>"));
        modem.on("AT+UFWINSTALL", Reply::ok());
        modem
    }

    fn lock(&self) -> MutexGuard<'_, ModemState> {
        self.state.lock().unwrap()
    }

    /// Answer `command` the same way every time.
    pub fn on(&self, command: &str, reply: Reply) {
        self.on_call(command, move |_| Some(reply.clone()));
    }

    /// Answer `command` depending on the zero-based call index.
    /// `None` leaves the command unanswered.
    pub fn on_call<F>(&self, command: &str, handler: F)
    where
        F: FnMut(usize) -> Option<Reply> + Send + 'static,
    {
        self.lock()
            .handlers
            .insert(command.to_string(), Box::new(handler));
    }

    /// Leave `command` unanswered.
    pub fn silence(&self, command: &str) {
        self.on_call(command, |_| None);
    }

    /// Answer any `AT+UDWNFILE=` announcement and enter data mode.
    pub fn on_prefix_download(&self, reply: Reply) {
        self.on(DOWNLOAD_KEY, reply);
    }

    /// Reply sent once all announced bytes arrived; `None` for no ack.
    pub fn set_upload_ack(&self, reply: Option<Reply>) {
        self.lock().upload_ack = reply;
    }

    /// Fail the data write with this zero-based index.
    pub fn fail_data_write(&self, index: usize) {
        self.lock().fail_data_write = Some(index);
    }

    pub fn fail_reads(&self) {
        self.lock().fail_reads = true;
    }

    pub fn push_unsolicited(&self, text: &str) {
        let now = self.clock.now();
        queue(&mut self.lock().pending, now, text.as_bytes().to_vec());
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    pub fn calls(&self, command: &str) -> usize {
        self.lock().calls.get(command).copied().unwrap_or(0)
    }

    pub fn raw_writes(&self) -> Vec<Vec<u8>> {
        self.lock().raw_writes.clone()
    }

    /// Writes received while in download data mode.
    pub fn data_writes(&self) -> Vec<Vec<u8>> {
        self.lock().data_writes.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }
}

const DOWNLOAD_KEY: &str = "AT+UDWNFILE=";

fn queue(pending: &mut VecDeque<(Instant, Vec<u8>)>, at: Instant, bytes: Vec<u8>) {
    let pos = pending
        .iter()
        .position(|(ready, _)| *ready > at)
        .unwrap_or(pending.len());
    pending.insert(pos, (at, bytes));
}

fn schedule(state: &mut ModemState, now: Instant, reply: &Reply) {
    for (delay, bytes) in &reply.segments {
        queue(&mut state.pending, now + *delay, bytes.clone());
    }
}

fn handle_command(state: &mut ModemState, now: Instant, command: String) {
    let key = if command.starts_with(DOWNLOAD_KEY) {
        DOWNLOAD_KEY.to_string()
    } else {
        command.clone()
    };
    let index = {
        let count = state.calls.entry(command.clone()).or_insert(0);
        *count += 1;
        *count - 1
    };
    let reply = state
        .handlers
        .get_mut(&key)
        .and_then(|handler| handler(index));
    if let Some(reply) = reply {
        schedule(state, now, &reply);
        if key == DOWNLOAD_KEY {
            state.download_remaining = command
                .split(',')
                .nth(1)
                .and_then(|len| len.trim().parse().ok());
        }
    }
    state.commands.push(command);
}

impl Read for MockModem {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.fail_reads {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device gone"));
        }
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if let Some((ready, bytes)) = state.pending.front_mut() {
            if *ready <= now {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.drain(..n);
                if bytes.is_empty() {
                    state.pending.pop_front();
                }
                return Ok(n);
            }
        }
        drop(state);
        self.clock.advance(POLL_STEP);
        Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
    }
}

impl Write for MockModem {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        state.raw_writes.push(buf.to_vec());

        if let Some(remaining) = state.download_remaining {
            if state.fail_data_write == Some(state.data_writes.len()) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
            }
            state.data_writes.push(buf.to_vec());
            let remaining = remaining.saturating_sub(buf.len());
            if remaining == 0 {
                state.download_remaining = None;
                if let Some(ack) = state.upload_ack.clone() {
                    schedule(&mut state, now, &ack);
                }
            } else {
                state.download_remaining = Some(remaining);
            }
            return Ok(buf.len());
        }

        state.line.extend_from_slice(buf);
        while let Some(pos) = state.line.windows(2).position(|w| w == b"\r\n") {
            let line: Vec<u8> = state.line.drain(..pos + 2).collect();
            let command = String::from_utf8_lossy(&line[..pos]).into_owned();
            handle_command(&mut state, now, command);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MockModem {
    fn clear_buffers(&mut self) -> Result<()> {
        let now = self.clock.now();
        let mut state = self.lock();
        state.pending.retain(|(ready, _)| *ready > now);
        state.line.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.closes += 1;
        state.closed = true;
        Ok(())
    }
}
