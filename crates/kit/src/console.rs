//! Scripted interaction with a VM serial console.
//!
//! [`Console`] wraps a byte stream pair (in practice the qemu child's
//! stdout/stdin) behind one blocking primitive: wait until one of a set of
//! patterns appears in the output, bounded by a timeout. A dedicated
//! reader thread feeds received bytes through a channel so the wait can be
//! bounded with `recv_timeout`; there is no other concurrency. The reader
//! and writer are generic so driver transitions can be exercised against
//! canned terminal fixtures.

use std::io::{Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use color_eyre::eyre::{eyre, Context};
use color_eyre::Result;
use regex::Regex;
use tracing::trace;

/// Upper bound on retained console output; older output is dropped from
/// the front once exceeded. Patterns never need to span more than this.
const MAX_BUFFER: usize = 256 * 1024;

/// An expected console pattern that did not appear within its budget.
///
/// Terminal automation cannot be resumed mid-sequence, so callers treat
/// this as fatal everywhere except the final shutdown wait.
#[derive(Debug, thiserror::Error)]
#[error("timed out after {timeout:?} waiting for {expected:?} during {step}")]
pub struct InstallTimeoutError {
    /// Name of the state that was waiting.
    pub step: String,
    /// The patterns that were awaited.
    pub expected: Vec<String>,
    /// The elapsed budget.
    pub timeout: Duration,
}

/// A scripted serial console session.
pub struct Console {
    rx: Receiver<Vec<u8>>,
    writer: Box<dyn Write + Send>,
    transcript: Option<std::fs::File>,
    buf: String,
    eof: bool,
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("buffered", &self.buf.len())
            .field("eof", &self.eof)
            .finish()
    }
}

impl Console {
    /// Start a console session over a reader/writer pair.
    ///
    /// The reader is consumed by a background thread that exits when the
    /// stream ends (VM shutdown) or errors.
    pub fn new(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut chunk = [0u8; 4096];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(chunk[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            rx,
            writer: Box::new(writer),
            transcript: None,
            buf: String::new(),
            eof: false,
        }
    }

    /// Mirror everything received (and every line sent) to a log file.
    pub fn set_transcript(&mut self, file: std::fs::File) {
        self.transcript = Some(file);
    }

    /// Send one line to the console, with trailing newline.
    pub fn send_line(&mut self, line: &str) -> Result<()> {
        trace!("console send: {line}");
        if let Some(t) = self.transcript.as_mut() {
            let _ = writeln!(t, ">>> {line}");
        }
        self.writer
            .write_all(line.as_bytes())
            .context("Writing to console")?;
        self.writer.write_all(b"\n").context("Writing to console")?;
        self.writer.flush().context("Flushing console")?;
        Ok(())
    }

    /// Block until one of `patterns` (regexes) matches the console output,
    /// or `timeout` elapses.
    ///
    /// Returns the index of the matching pattern; the buffer is consumed
    /// through the end of the earliest match, so successive calls observe
    /// strictly later output. Timeout raises [`InstallTimeoutError`]; end
    /// of stream before a match is a distinct fatal error.
    pub fn expect_one_of(
        &mut self,
        step: &str,
        patterns: &[&str],
        timeout: Duration,
    ) -> Result<usize> {
        let regexes: Vec<Regex> = patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("Invalid console pattern {p:?}")))
            .collect::<Result<_>>()?;
        let deadline = Instant::now() + timeout;

        loop {
            if let Some((idx, end)) = earliest_match(&self.buf, &regexes) {
                trace!("console matched {:?} during {step}", patterns[idx]);
                self.buf.drain(..end);
                return Ok(idx);
            }
            if self.eof {
                return Err(eyre!(
                    "console closed while waiting for {patterns:?} during {step}"
                ));
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(InstallTimeoutError {
                    step: step.to_string(),
                    expected: patterns.iter().map(|s| s.to_string()).collect(),
                    timeout,
                }
                .into());
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(chunk) => self.absorb(&chunk),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.eof = true,
            }
        }
    }

    /// Drain remaining output until end of stream or `timeout`.
    ///
    /// Returns true on a clean end of stream, false if the budget elapsed
    /// first.
    pub fn wait_eof(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.eof {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.rx.recv_timeout(deadline - now) {
                Ok(chunk) => self.absorb(&chunk),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => self.eof = true,
            }
        }
        true
    }

    /// The most recent retained console output, for diagnostics.
    pub fn tail(&self) -> &str {
        // Avoid splitting a multi-byte character
        let mut start = self.buf.len().saturating_sub(2048);
        while start < self.buf.len() && !self.buf.is_char_boundary(start) {
            start += 1;
        }
        &self.buf[start..]
    }

    fn absorb(&mut self, chunk: &[u8]) {
        if let Some(t) = self.transcript.as_mut() {
            let _ = t.write_all(chunk);
        }
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        if self.buf.len() > MAX_BUFFER {
            let mut cut = self.buf.len() - MAX_BUFFER / 2;
            while cut < self.buf.len() && !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }
}

/// Find the match that starts earliest in the buffer, returning the
/// pattern index and the end offset of that match.
fn earliest_match(buf: &str, regexes: &[Regex]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, usize)> = None;
    for (idx, re) in regexes.iter().enumerate() {
        if let Some(m) = re.find(buf) {
            let candidate = (m.start(), idx, m.end());
            if best.map(|(s, _, _)| candidate.0 < s).unwrap_or(true) {
                best = Some(candidate);
            }
        }
    }
    best.map(|(_, idx, end)| (idx, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fixture(bytes: &str) -> Console {
        Console::new(Cursor::new(bytes.as_bytes().to_vec()), Vec::new())
    }

    const SHORT: Duration = Duration::from_secs(5);

    #[test]
    fn test_expect_matches_in_stream_order() -> Result<()> {
        let mut console = fixture("some noise\nboot> ");
        let idx = console.expect_one_of("await-boot-prompt", &["boot> "], SHORT)?;
        assert_eq!(idx, 0);
        Ok(())
    }

    #[test]
    fn test_expect_consumes_through_match() -> Result<()> {
        let mut console = fixture("boot> later boot> trailing");
        console.expect_one_of("first", &["boot> "], SHORT)?;
        // Second wait sees only output after the first match
        console.expect_one_of("second", &["boot> "], SHORT)?;
        assert!(console
            .expect_one_of("third", &["boot> "], Duration::from_millis(50))
            .is_err());
        Ok(())
    }

    #[test]
    fn test_earliest_of_several_patterns_wins() -> Result<()> {
        let mut console = fixture("Installation failed ... CONGRATULATIONS!");
        let idx = console.expect_one_of(
            "await-completion",
            &["CONGRATULATIONS!", "Installation failed"],
            SHORT,
        )?;
        assert_eq!(idx, 1);
        Ok(())
    }

    #[test]
    fn test_timeout_is_typed() {
        // Pipe that never produces data but stays open
        let (_keep_alive, rx_side) = pipe_pair();
        let mut console = Console::new(rx_side, Vec::new());
        let err = console
            .expect_one_of("await-boot-prompt", &["boot> "], Duration::from_millis(50))
            .unwrap_err();
        let timeout = err.downcast_ref::<InstallTimeoutError>().expect("typed");
        assert_eq!(timeout.step, "await-boot-prompt");
    }

    #[test]
    fn test_eof_before_match_is_an_error() {
        let mut console = fixture("stream ends early");
        let err = console
            .expect_one_of("await-boot-prompt", &["boot> "], SHORT)
            .unwrap_err();
        assert!(err.downcast_ref::<InstallTimeoutError>().is_none());
    }

    #[test]
    fn test_wait_eof() {
        let mut console = fixture("final output");
        assert!(console.wait_eof(SHORT));

        let (_keep_alive, rx_side) = pipe_pair();
        let mut console = Console::new(rx_side, Vec::new());
        assert!(!console.wait_eof(Duration::from_millis(50)));
    }

    /// A reader that blocks forever (until the writer half is dropped).
    fn pipe_pair() -> (std::sync::mpsc::Sender<u8>, ChannelReader) {
        let (tx, rx) = std::sync::mpsc::channel();
        (tx, ChannelReader { rx })
    }

    struct ChannelReader {
        rx: std::sync::mpsc::Receiver<u8>,
    }

    impl Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.rx.recv() {
                Ok(b) => {
                    buf[0] = b;
                    Ok(1)
                }
                Err(_) => Ok(0),
            }
        }
    }
}
