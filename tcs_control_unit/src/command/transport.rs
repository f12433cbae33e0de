//! Channel transports.
//!
//! The loop reads at most one line per channel per call and never blocks.
//! [`FifoTransport`] is the daemon's named-pipe pair per channel;
//! [`MemoryTransport`] backs tests and benches.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::channel::ChannelId;

const READ_CHUNK: usize = 512;

/// Longest accepted command line; a longer line is discarded whole.
const MAX_LINE: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel I/O on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot create FIFO {path}: {errno}")]
    Fifo { path: String, errno: Errno },
}

/// Line-oriented, non-blocking access to the command channels.
pub trait ChannelTransport: Send {
    /// Next complete inbound line, if one is available right now.
    fn read_line(&mut self, channel: ChannelId) -> Result<Option<String>, TransportError>;

    /// Send one response line. A channel nobody listens to drops it.
    fn write_line(&mut self, channel: ChannelId, line: &str) -> Result<(), TransportError>;
}

// ─── In-Memory ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Queues {
    inbound: [VecDeque<String>; ChannelId::ALL.len()],
    outbound: [Vec<String>; ChannelId::ALL.len()],
}

/// Transport over in-process queues.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    queues: Arc<Mutex<Queues>>,
}

/// Client side of a [`MemoryTransport`]: push commands, collect replies.
#[derive(Debug, Clone)]
pub struct MemoryChannels {
    queues: Arc<Mutex<Queues>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> MemoryChannels {
        MemoryChannels {
            queues: Arc::clone(&self.queues),
        }
    }
}

impl MemoryChannels {
    pub fn push(&self, channel: ChannelId, line: &str) {
        self.queues.lock().inbound[channel.index()].push_back(line.to_string());
    }

    /// Replies written to `channel` since the last call.
    pub fn take_output(&self, channel: ChannelId) -> Vec<String> {
        std::mem::take(&mut self.queues.lock().outbound[channel.index()])
    }

    /// Commands not yet consumed by the loop.
    pub fn queued(&self, channel: ChannelId) -> usize {
        self.queues.lock().inbound[channel.index()].len()
    }
}

impl ChannelTransport for MemoryTransport {
    fn read_line(&mut self, channel: ChannelId) -> Result<Option<String>, TransportError> {
        Ok(self.queues.lock().inbound[channel.index()].pop_front())
    }

    fn write_line(&mut self, channel: ChannelId, line: &str) -> Result<(), TransportError> {
        self.queues.lock().outbound[channel.index()].push(line.to_string());
        Ok(())
    }
}

// ─── Named FIFOs ────────────────────────────────────────────────────

#[derive(Debug)]
struct FifoPair {
    in_path: PathBuf,
    out_path: PathBuf,
    input: File,
    /// Opened on first write once a reader exists.
    output: Option<File>,
    partial: Vec<u8>,
    /// The line being received has exceeded `MAX_LINE`.
    overflow: bool,
    lines: VecDeque<String>,
}

impl FifoPair {
    fn open(dir: &Path, channel: ChannelId) -> Result<Self, TransportError> {
        let in_path = dir.join(format!("{}.in", channel.as_str()));
        let out_path = dir.join(format!("{}.out", channel.as_str()));
        make_fifo(&in_path)?;
        make_fifo(&out_path)?;
        let input = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&in_path)
            .map_err(|source| io_error(&in_path, source))?;
        Ok(Self {
            in_path,
            out_path,
            input,
            output: None,
            partial: Vec::new(),
            overflow: false,
            lines: VecDeque::new(),
        })
    }

    fn fill(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.input.read(&mut chunk) {
                // No writer attached.
                Ok(0) => return Ok(()),
                Ok(n) => self.split(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_error(&self.in_path, e)),
            }
        }
    }

    fn split(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\n' {
                if std::mem::take(&mut self.overflow) {
                    warn!(path = %self.in_path.display(), max = MAX_LINE, "overlong line discarded");
                    continue;
                }
                let line = String::from_utf8_lossy(&self.partial).trim().to_string();
                self.partial.clear();
                if !line.is_empty() {
                    self.lines.push_back(line);
                }
            } else if self.overflow {
                continue;
            } else if self.partial.len() < MAX_LINE {
                self.partial.push(b);
            } else {
                self.overflow = true;
                self.partial.clear();
            }
        }
    }

    fn send(&mut self, line: &str) -> Result<(), TransportError> {
        if self.output.is_none() {
            match OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(&self.out_path)
            {
                Ok(file) => self.output = Some(file),
                Err(e) if e.raw_os_error() == Some(Errno::ENXIO as i32) => {
                    debug!(path = %self.out_path.display(), "no reader, reply dropped");
                    return Ok(());
                }
                Err(e) => return Err(io_error(&self.out_path, e)),
            }
        }
        let Some(file) = self.output.as_mut() else {
            return Ok(());
        };
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');
        match file.write_all(framed.as_bytes()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                debug!(path = %self.out_path.display(), "reader went away");
                self.output = None;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!(path = %self.out_path.display(), "reply pipe full, line dropped");
                Ok(())
            }
            Err(e) => Err(io_error(&self.out_path, e)),
        }
    }
}

/// One `<Name>.in` / `<Name>.out` FIFO pair per channel under one directory.
#[derive(Debug)]
pub struct FifoTransport {
    dir: PathBuf,
    pairs: Vec<FifoPair>,
}

impl FifoTransport {
    /// Create (if needed) and open every channel's FIFOs in `dir`.
    pub fn open(dir: &Path) -> Result<Self, TransportError> {
        std::fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;
        let pairs = ChannelId::ALL
            .iter()
            .map(|ch| FifoPair::open(dir, *ch))
            .collect::<Result<Vec<_>, _>>()?;
        info!(dir = %dir.display(), channels = pairs.len(), "command FIFOs ready");
        Ok(Self {
            dir: dir.to_path_buf(),
            pairs,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ChannelTransport for FifoTransport {
    fn read_line(&mut self, channel: ChannelId) -> Result<Option<String>, TransportError> {
        let pair = &mut self.pairs[channel.index()];
        if pair.lines.is_empty() {
            pair.fill()?;
        }
        Ok(pair.lines.pop_front())
    }

    fn write_line(&mut self, channel: ChannelId, line: &str) -> Result<(), TransportError> {
        self.pairs[channel.index()].send(line)
    }
}

fn make_fifo(path: &Path) -> Result<(), TransportError> {
    match mkfifo(path, Mode::from_bits_truncate(0o660)) {
        Ok(()) | Err(Errno::EEXIST) => Ok(()),
        Err(errno) => Err(TransportError::Fifo {
            path: path.display().to_string(),
            errno,
        }),
    }
}

fn io_error(path: &Path, source: io::Error) -> TransportError {
    TransportError::Io {
        path: path.display().to_string(),
        source,
    }
}
