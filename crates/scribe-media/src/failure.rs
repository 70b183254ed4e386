//! Encoder failure description and retry classification.

use std::fmt;

use nix::errno::Errno;
use nix::sys::signal::Signal;

/// How an external encoder invocation failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderFailure {
    /// Program that failed
    pub program: String,
    /// Process exit code, when it exited normally
    pub exit_code: Option<i32>,
    /// Terminating signal, when it was killed
    pub signal: Option<i32>,
    /// OS error raised while spawning or talking to the process
    pub os_error: Option<i32>,
    /// Captured tail of standard error
    pub stderr: String,
}

impl EncoderFailure {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_signal(mut self, signal: i32) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_os_error(mut self, errno: i32) -> Self {
        self.os_error = Some(errno);
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Failure raised by the OS before or while running `program`.
    pub fn from_io(program: impl Into<String>, error: &std::io::Error) -> Self {
        let failure = Self::new(program).with_stderr(error.to_string());
        match error.raw_os_error() {
            Some(errno) => failure.with_os_error(errno),
            None => failure,
        }
    }

    /// Last non-empty stderr line, which usually carries the reason.
    pub fn summary(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

impl fmt::Display for EncoderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        if let Some(code) = self.exit_code {
            write!(f, " exited with code {code}")?;
        }
        if let Some(signal) = self.signal {
            match Signal::try_from(signal) {
                Ok(sig) => write!(f, " killed by {}", sig.as_str())?,
                Err(_) => write!(f, " killed by signal {signal}")?,
            }
        }
        if let Some(errno) = self.os_error {
            write!(f, " ({})", Errno::from_raw(errno).desc())?;
        }
        let summary = self.summary();
        if !summary.is_empty() {
            write!(f, ": {summary}")?;
        }
        Ok(())
    }
}

impl std::error::Error for EncoderFailure {}

/// Stderr markers of permanent failures. These win over every other signal.
const PERMANENT_MARKERS: &[&str] = &[
    "invalid data found",
    "no such file or directory",
    "permission denied",
    "unknown encoder",
    "invalid argument",
    "could not find codec",
    "moov atom not found",
];

/// Stderr markers of transient failures.
const TRANSIENT_MARKERS: &[&str] = &[
    "cannot allocate memory",
    "resource temporarily unavailable",
    "connection reset",
    "broken pipe",
    "device or resource busy",
    "timed out",
];

/// Exit codes worth retrying: FFmpeg memory (7) and system (8) errors, and
/// shells reporting SIGKILL (137) or SIGSEGV (139).
const TRANSIENT_EXIT_CODES: &[i32] = &[7, 8, 137, 139];

const TRANSIENT_SIGNALS: &[Signal] = &[Signal::SIGKILL, Signal::SIGSEGV, Signal::SIGBUS];

const TRANSIENT_ERRNOS: &[Errno] = &[
    Errno::EBUSY,
    Errno::ETIMEDOUT,
    Errno::ECONNRESET,
    Errno::EPIPE,
    Errno::EAGAIN,
    Errno::ENOSPC,
];

/// Decide whether an encoder failure is worth another attempt.
///
/// Exit codes 1, 2, 3 and any code not listed above are permanent.
pub fn is_retryable_error(failure: &EncoderFailure) -> bool {
    let stderr = failure.stderr.to_lowercase();

    if PERMANENT_MARKERS.iter().any(|m| stderr.contains(m)) {
        return false;
    }

    if let Some(signal) = failure.signal {
        if TRANSIENT_SIGNALS.iter().any(|s| *s as i32 == signal) {
            return true;
        }
    }

    if let Some(errno) = failure.os_error {
        if TRANSIENT_ERRNOS.iter().any(|e| *e as i32 == errno) {
            return true;
        }
    }

    if let Some(code) = failure.exit_code {
        if TRANSIENT_EXIT_CODES.contains(&code) {
            return true;
        }
    }

    TRANSIENT_MARKERS.iter().any(|m| stderr.contains(m))
}
