//! Byte-oriented transport consumed by the record decoder.
//!
//! Framing belongs to the transport: every record handed to the decoder has
//! already been cut out of the device stream. [`ReplayTransport`] replays a
//! captured session from text, which is how recorded dumps are decoded
//! offline and how the decoder is exercised in tests.

use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead};
use std::path::Path;

use glucometer_core::error::{GlucometerError, Result};
use tracing::debug;

/// A device link able to run multi-record queries.
///
/// Implementations must make `send` discard whatever remains of the
/// previous response, so that a consumer abandoning a pass leaves the link
/// usable for the next command.
pub trait Transport {
    /// Issue `command` to the device.
    fn send(&mut self, command: &[u8]) -> io::Result<()>;

    /// Next record of the pending response, or `None` once the device sent
    /// its end-of-response sentinel.
    fn next_record(&mut self) -> io::Result<Option<Vec<u8>>>;

    /// Called when a consumer stops reading a response before the sentinel.
    fn abandon(&mut self) {}

    /// Lazily iterate over the records of the pending response.
    fn receive_framed_records(&mut self) -> FramedRecords<'_, Self>
    where
        Self: Sized,
    {
        FramedRecords {
            transport: self,
            done: false,
        }
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, command: &[u8]) -> io::Result<()> {
        (**self).send(command)
    }

    fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        (**self).next_record()
    }

    fn abandon(&mut self) {
        (**self).abandon()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(&mut self, command: &[u8]) -> io::Result<()> {
        (**self).send(command)
    }

    fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        (**self).next_record()
    }

    fn abandon(&mut self) {
        (**self).abandon()
    }
}

/// Iterator returned by [`Transport::receive_framed_records`].
///
/// Reads one record per step and ends after the sentinel or the first error.
pub struct FramedRecords<'a, T: ?Sized> {
    transport: &'a mut T,
    done: bool,
}

impl<T: Transport + ?Sized> Iterator for FramedRecords<'_, T> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.transport.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<T: Transport + ?Sized> std::iter::FusedIterator for FramedRecords<'_, T> {}

// ── ReplayTransport ───────────────────────────────────────────────────────────

/// Transport answering commands from a captured session.
///
/// Capture format, one record per line:
///
/// ```text
/// # FreeStyle Precision Neo, 2017-03-04
/// $serlnum?
/// JKXX123-4567
///
/// $result?
/// 7,2,3,4,17,10,15,0,123,0,0,0,0,0,0,0,0,0,0
/// 6,1,3,4,17,10,20,0,0,0,0,0,0,0,0,0,0,0,0
/// ```
///
/// A line starting with `$` opens the response of that command, blank lines
/// close it and `#` lines are comments. Each `send` replays the full
/// response again.
#[derive(Debug, Default, Clone)]
pub struct ReplayTransport {
    responses: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    pending: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the response to `command`.
    pub fn with_response<C, R, I>(mut self, command: C, records: I) -> Self
    where
        C: AsRef<[u8]>,
        R: AsRef<[u8]>,
        I: IntoIterator<Item = R>,
    {
        self.responses.insert(
            command.as_ref().to_vec(),
            records.into_iter().map(|r| r.as_ref().to_vec()).collect(),
        );
        self
    }

    /// Parse a capture from any buffered reader.
    pub fn from_reader<R: BufRead>(reader: R) -> io::Result<Self> {
        let mut transport = Self::new();
        let mut current: Option<Vec<u8>> = None;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end_matches('\r');

            if line.trim().is_empty() {
                current = None;
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            if line.starts_with('$') {
                let command = line.trim().as_bytes().to_vec();
                if transport.responses.contains_key(&command) {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("line {}: duplicate response for {}", idx + 1, line.trim()),
                    ));
                }
                transport.responses.insert(command.clone(), Vec::new());
                current = Some(command);
                continue;
            }

            match current.as_ref().and_then(|c| transport.responses.get_mut(c)) {
                Some(records) => records.push(line.as_bytes().to_vec()),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("line {}: record outside of a command response", idx + 1),
                    ))
                }
            }
        }

        debug!(
            "Loaded capture with {} command responses",
            transport.responses.len()
        );
        Ok(transport)
    }

    /// Load a capture file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|source| GlucometerError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(io::BufReader::new(file)).map_err(|source| GlucometerError::FileRead {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Commands sent so far, oldest first.
    pub fn commands_sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Records of the current response not yet read.
    pub fn pending_records(&self) -> usize {
        self.pending.len()
    }
}

impl Transport for ReplayTransport {
    fn send(&mut self, command: &[u8]) -> io::Result<()> {
        self.sent.push(command.to_vec());
        self.pending.clear();
        match self.responses.get(command) {
            Some(records) => {
                self.pending.extend(records.iter().cloned());
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "no captured response for {}",
                    String::from_utf8_lossy(command)
                ),
            )),
        }
    }

    fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.pending.pop_front())
    }

    fn abandon(&mut self) {
        self.pending.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
