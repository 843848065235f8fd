//! Child process on a pseudo-terminal, driven by prompt matching.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace};
use portable_pty::{Child, CommandBuilder, ExitStatus, MasterPty, PtySize, native_pty_system};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::Interactive;
use super::buffer::{OutputBuffer, incomplete_escape_start};
use super::patterns::first_match;
use crate::error::{ExpectError, SessionError};
use crate::transport::RemoteCommand;

/// How long a child gets to exit (or its last output to arrive) once the
/// terminal has closed or it has been killed.
const REAP_GRACE: Duration = Duration::from_secs(2);

/// Interval between exit checks while reaping.
const REAP_POLL: Duration = Duration::from_millis(10);

/// Callback receiving every complete line the child writes.
pub type OutputFn = Arc<dyn Fn(&str) + Send + Sync>;

type SharedOutputFn = Arc<Mutex<Option<OutputFn>>>;

/// Configuration for an [`Expect`] session.
#[derive(Debug, Clone)]
pub struct ExpectConfig {
    /// Appended to every line sent to the child.
    pub linesep: String,

    /// How many trailing bytes are examined for the last line.
    pub search_depth: usize,

    /// Terminal height.
    pub rows: u16,

    /// Terminal width.
    pub cols: u16,
}

impl Default for ExpectConfig {
    fn default() -> Self {
        Self {
            linesep: "\n".to_string(),
            search_depth: 1000,
            rows: 24,
            cols: 200,
        }
    }
}

/// A child process attached to a pseudo-terminal whose output is scanned
/// for prompts.
///
/// Clients such as ssh and scp talk to `/dev/tty` for host-key questions and
/// passwords, so the child gets a real terminal as its controlling tty and
/// stdio. A reader thread drains the master side into a channel, so the
/// child never blocks on a full terminal buffer even while nobody is
/// reading. Must be created inside a tokio runtime.
pub struct Expect {
    command: String,
    config: ExpectConfig,
    child: Box<dyn Child + Send + Sync>,
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    output_fn: SharedOutputFn,
    exit_status: Option<Option<i32>>,
    closed: bool,
}

impl Expect {
    /// Spawn `command` with no output callback.
    pub fn spawn(command: &RemoteCommand, config: ExpectConfig) -> Result<Self, SessionError> {
        Self::spawn_with_output(command, config, None)
    }

    /// Spawn `command`, feeding every output line to `output_fn`.
    pub fn spawn_with_output(
        command: &RemoteCommand,
        config: ExpectConfig,
        output_fn: Option<OutputFn>,
    ) -> Result<Self, SessionError> {
        let command_line = command.to_string();
        debug!("spawning '{}'", command_line);

        let pair = native_pty_system()
            .openpty(PtySize {
                rows: config.rows,
                cols: config.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_error)?;

        let mut builder = CommandBuilder::new(command.program());
        builder.args(command.arguments());
        // Relative copy paths resolve against our directory, not $HOME.
        if let Ok(cwd) = std::env::current_dir() {
            builder.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(builder)
            .map_err(|e| SessionError::SpawnFailed {
                command: command_line.clone(),
                source: io::Error::other(e.to_string()),
            })?;
        // Only the child may hold the slave side, or the reader never sees EOF.
        drop(pair.slave);

        let output_fn: SharedOutputFn = Arc::new(Mutex::new(output_fn));
        let (tx, rx) = mpsc::unbounded_channel();

        let started = pair
            .master
            .try_clone_reader()
            .map_err(pty_error)
            .and_then(|reader| {
                let output_fn = output_fn.clone();
                thread::Builder::new()
                    .name("vmshell-pty-reader".to_string())
                    .spawn(move || pump(reader, tx, output_fn))
                    .map_err(|e| SessionError::Pty {
                        message: format!("failed to start reader thread: {e}"),
                    })
            })
            .and_then(|_| pair.master.take_writer().map_err(pty_error));

        let writer = match started {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(kill_err) = child.kill() {
                    debug!("failed to kill '{}': {}", command_line, kill_err);
                }
                return Err(e);
            }
        };

        Ok(Self {
            command: command_line,
            config,
            child,
            master: Some(pair.master),
            writer: Some(writer),
            rx,
            output_fn,
            exit_status: None,
            closed: false,
        })
    }

    /// The command line this session was spawned with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The line separator appended by `send_line`.
    pub fn linesep(&self) -> &str {
        &self.config.linesep
    }

    /// OS process id, while the child is running.
    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Replace the per-line output callback. `None` stops forwarding.
    pub fn set_output_func(&self, output_fn: Option<OutputFn>) {
        let mut slot = self.output_fn.lock().unwrap_or_else(|e| e.into_inner());
        *slot = output_fn;
    }

    /// Send raw text without a line separator.
    pub async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        let writer = self.writer.as_mut().ok_or(SessionError::Closed)?;
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Throw away output that arrived since the last read.
    pub fn discard_pending(&mut self) -> String {
        let mut buffer = OutputBuffer::new(self.config.search_depth);
        self.drain_pending(&mut buffer);
        buffer.take_string()
    }

    /// Exit code of the child if it has exited. `Some(None)` means it was
    /// killed by a signal.
    fn try_exit_status(&mut self) -> Result<Option<Option<i32>>, SessionError> {
        if self.exit_status.is_none() {
            if let Some(status) = self.child.try_wait()? {
                self.exit_status = Some(exit_code(&status));
            }
        }
        Ok(self.exit_status)
    }

    /// Poll for the exit status until `deadline`.
    async fn poll_exit_status(&mut self, deadline: Instant) -> Result<Option<Option<i32>>, SessionError> {
        loop {
            if let Some(status) = self.try_exit_status()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(REAP_POLL).await;
        }
    }

    /// Wait for the child to exit, killing it if it outlives the grace
    /// period. A child that survives even that is reported as signalled.
    async fn reap(&mut self) -> Result<Option<i32>, SessionError> {
        if let Some(status) = self.poll_exit_status(Instant::now() + REAP_GRACE).await? {
            return Ok(status);
        }

        debug!("'{}' did not exit; killing it", self.command);
        if let Err(e) = self.child.kill() {
            debug!("failed to kill '{}': {}", self.command, e);
        }
        Ok(self
            .poll_exit_status(Instant::now() + REAP_GRACE)
            .await?
            .unwrap_or(None))
    }

    /// Pull whatever output is already queued without waiting.
    fn drain_pending(&mut self, buffer: &mut OutputBuffer) {
        while let Ok(chunk) = self.rx.try_recv() {
            buffer.extend(&chunk);
        }
    }

    /// Collect output still in flight after the child went away.
    async fn drain_to_eof(&mut self, buffer: &mut OutputBuffer) {
        let rx = &mut self.rx;
        let collect = async {
            while let Some(chunk) = rx.recv().await {
                buffer.extend(&chunk);
            }
        };
        if tokio::time::timeout(REAP_GRACE, collect).await.is_err() {
            trace!("terminal of '{}' still open after exit", self.command);
        }
    }

    /// Last match attempt on the final output, then the termination error.
    async fn finish(&mut self, patterns: &[Regex], mut buffer: OutputBuffer) -> Result<(usize, String), ExpectError> {
        self.drain_to_eof(&mut buffer).await;

        if let Some(index) = first_match(patterns, &buffer.last_line()) {
            return Ok((index, buffer.take_string()));
        }

        let status = self.reap().await?;
        Err(ExpectError::ProcessTerminated {
            output: buffer.take_string(),
            status,
        })
    }
}

impl Interactive for Expect {
    async fn read_until_last_line_matches(
        &mut self,
        patterns: &[Regex],
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<(usize, String), ExpectError> {
        if self.closed {
            return Err(SessionError::Closed.into());
        }

        let deadline = Instant::now() + timeout;
        let mut buffer = OutputBuffer::new(self.config.search_depth);

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ExpectError::Timeout {
                    output: buffer.take_string(),
                });
            }
            let wait = poll_interval.min(deadline - now);

            match tokio::time::timeout(wait, self.rx.recv()).await {
                Ok(Some(chunk)) => {
                    buffer.extend(&chunk);
                    self.drain_pending(&mut buffer);

                    let matched = first_match(patterns, &buffer.last_line());
                    trace!("last line {:?} matched {:?}", buffer.last_line(), matched);
                    if let Some(index) = matched {
                        return Ok((index, buffer.take_string()));
                    }
                }
                // The terminal hit EOF.
                Ok(None) => return self.finish(patterns, buffer).await,
                Err(_) => {
                    if self.try_exit_status()?.is_some() {
                        return self.finish(patterns, buffer).await;
                    }
                }
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), SessionError> {
        let mut text = String::with_capacity(line.len() + self.config.linesep.len());
        text.push_str(line);
        text.push_str(&self.config.linesep);
        self.send(&text).await
    }

    async fn is_responsive(&mut self, timeout: Duration) -> bool {
        self.discard_pending();

        if self.send_line("").await.is_err() {
            return false;
        }
        matches!(tokio::time::timeout(timeout, self.rx.recv()).await, Ok(Some(_)))
    }

    fn is_dead(&mut self) -> bool {
        if self.closed {
            return true;
        }
        !matches!(self.try_exit_status(), Ok(None))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.writer.take();

        if matches!(self.try_exit_status(), Ok(None)) {
            if let Err(e) = self.child.kill() {
                debug!("failed to kill '{}': {}", self.command, e);
            }
            if let Err(e) = self.reap().await {
                debug!("failed to reap '{}': {}", self.command, e);
            }
        }

        // The reader thread ends on its own once the slave side is closed.
        self.master.take();
        debug!("closed '{}'", self.command);
    }
}

impl Drop for Expect {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        trace!("Expect for '{}' dropped without close()", self.command);
        if matches!(self.try_exit_status(), Ok(None)) {
            if let Err(e) = self.child.kill() {
                debug!("failed to kill '{}': {}", self.command, e);
            }
        }
    }
}

fn pty_error(e: impl std::fmt::Display) -> SessionError {
    SessionError::Pty { message: e.to_string() }
}

fn exit_code(status: &ExitStatus) -> Option<i32> {
    match status.signal() {
        Some(_) => None,
        None => i32::try_from(status.exit_code()).ok(),
    }
}

/// Copy the master side of the terminal into the session channel.
///
/// Runs on its own thread because PTY reads are blocking. An escape sequence
/// cut off at the end of a read is held back until it is complete.
fn pump(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<Bytes>, output_fn: SharedOutputFn) {
    let mut buf = [0u8; 4096];
    let mut held = Vec::new();
    let mut pending = Vec::new();

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let mut data = std::mem::take(&mut held);
                data.extend_from_slice(&buf[..n]);
                if let Some(start) = incomplete_escape_start(&data) {
                    held = data.split_off(start);
                }
                if data.is_empty() {
                    continue;
                }

                emit_lines(&mut pending, &data, &output_fn);
                if tx.send(Bytes::from(data)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                // EIO once every slave-side descriptor is closed.
                trace!("terminal read ended: {}", e);
                break;
            }
        }
    }

    if !held.is_empty() {
        emit_lines(&mut pending, &held, &output_fn);
        if tx.send(Bytes::from(held)).is_err() {
            return;
        }
    }
    if !pending.is_empty() {
        if let Some(f) = current_output_fn(&output_fn) {
            f(String::from_utf8_lossy(&pending).trim_end_matches('\r'));
        }
    }
}

fn current_output_fn(output_fn: &SharedOutputFn) -> Option<OutputFn> {
    output_fn.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Forward every complete line in `pending + chunk`, keeping the remainder.
fn emit_lines(pending: &mut Vec<u8>, chunk: &[u8], output_fn: &SharedOutputFn) {
    pending.extend_from_slice(chunk);
    let Some(last_newline) = memchr::memrchr(b'\n', pending) else {
        return;
    };
    let complete: Vec<u8> = pending.drain(..=last_newline).collect();

    let Some(f) = current_output_fn(output_fn) else {
        return;
    };
    for line in complete[..complete.len() - 1].split(|b| *b == b'\n') {
        f(String::from_utf8_lossy(line).trim_end_matches('\r'));
    }
}
