//! Boot log: a fixed ring of formatted `log` records.

use core::fmt;
use spin::{Mutex, MutexGuard};

/// Bytes retained by the boot log.
pub const LOG_SIZE: usize = 16 * 1024;

/// The global boot log.
pub static LOG: Mutex<Log<LOG_SIZE>> = Mutex::new(Log::new());

#[cfg_attr(not(feature = "boot_log"), allow(dead_code))]
static LOGGER: BootLogger = BootLogger;

/// Installs the boot log as the `log` backend.
///
/// Patching runs before any console exists, so everything it reports lands here
/// and can be read back once one is up.
#[cfg(feature = "boot_log")]
pub fn init(level: ::log::LevelFilter) -> Result<(), ::log::SetLoggerError> {
    ::log::set_logger(&LOGGER)?;
    ::log::set_max_level(level);
    Ok(())
}

/// A circular buffer for storing log messages.
pub struct Log<const N: usize> {
    /// The circular buffer.
    data: [u8; N],
    /// Index of the oldest byte.
    start: usize,
    /// Bytes currently held.
    len: usize,
}

impl<const N: usize> Log<N> {
    /// Creates a new, empty `Log`.
    pub const fn new() -> Self {
        Log {
            data: [0; N],
            start: 0,
            len: 0,
        }
    }

    /// Reads the log buffer as a pair of slices, oldest first.
    pub fn read(&self) -> (&[u8], &[u8]) {
        let (wrapped, tail) = self.data.split_at(self.start);
        match tail.get(..self.len) {
            Some(first) => (first, &[]),
            None => {
                let rest = self.len.saturating_sub(tail.len());
                (tail, wrapped.get(..rest).unwrap_or(&[]))
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes to the log buffer, dropping the oldest bytes once full.
    pub fn write(&mut self, buf: &[u8]) {
        if N == 0 {
            return;
        }
        for &b in buf {
            if self.len == N {
                self.start = self.start.wrapping_add(1).checked_rem(N).unwrap_or(0);
                self.len = self.len.wrapping_sub(1);
            }
            let at = self.start.wrapping_add(self.len).checked_rem(N).unwrap_or(0);
            if let Some(slot) = self.data.get_mut(at) {
                *slot = b;
            }
            self.len = self.len.wrapping_add(1);
        }
    }
}

/// A log writer.
///
/// Holds the lock on a log for as long as one record is being formatted, so
/// records from different callers never interleave.
pub struct Writer<'a, const N: usize> {
    /// A lock on the log.
    log: MutexGuard<'a, Log<N>>,
}

impl<'a, const N: usize> Writer<'a, N> {
    /// Creates a new `Writer`.
    pub fn new(log: &'a Mutex<Log<N>>) -> Writer<'a, N> {
        Writer { log: log.lock() }
    }
}

impl<const N: usize> fmt::Write for Writer<'_, N> {
    fn write_str(&mut self, s: &str) -> Result<(), fmt::Error> {
        self.log.write(s.as_bytes());
        Ok(())
    }
}

#[cfg_attr(not(feature = "boot_log"), allow(dead_code))]
struct BootLogger;

impl ::log::Log for BootLogger {
    fn enabled(&self, metadata: &::log::Metadata<'_>) -> bool {
        metadata.level() <= ::log::max_level()
    }

    fn log(&self, record: &::log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut writer = Writer::new(&LOG);
        // Infallible: `Writer::write_str` never errors.
        let _ = fmt::Write::write_fmt(
            &mut writer,
            format_args!("[{}] {}: {}\n", record.level(), record.target(), record.args()),
        );
    }

    fn flush(&self) {}
}
