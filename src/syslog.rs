//! A `log::Log` implementation that writes to the system logger, installed
//! by `src/bin/igmpproxy.rs` when run in daemon mode (no `-d`).
//!
//! Grounded on the same "pluggable sink behind the `log` facade" shape
//! `env_logger` itself provides for the foreground case; this crate has no
//! syslog-writing code in its retrieval pack to imitate directly, so it is
//! written the way `log::Log` implementors conventionally are — a thin
//! struct holding the configured level, `enabled`/`log`/`flush` filling in
//! the trait, `set_boxed_logger` doing the one-time global install, built on
//! `libc`'s `openlog(3)`/`syslog(3)`/`closelog(3)` rather than pulling in a
//! dedicated syslog crate (the same "reach for `libc` directly" choice
//! `src/kernel/linux.rs` makes for `MRT_*`/`IP_MSFILTER`).

use std::ffi::CString;
use std::sync::Once;

use log::{Level, LevelFilter, Log, Metadata, Record};

static OPENLOG: Once = Once::new();

/// Logs to `syslog(3)` under `LOG_DAEMON`, levels mapped `Error → LOG_ERR`,
/// `Warn → LOG_WARNING`, `Info → LOG_NOTICE`, `Debug → LOG_INFO`,
/// `Trace → LOG_DEBUG` (the daemon has no use for `LOG_EMERG`/`LOG_ALERT`/
/// `LOG_CRIT`, which are reserved for conditions this process cannot itself
/// distinguish from an ordinary error).
pub struct SyslogLogger {
    ident: CString,
}

impl SyslogLogger {
    /// Install as the global logger, opening the syslog connection under
    /// `ident` (conventionally `"igmpproxy"`). Call once, from `main`, before
    /// any other thread can log.
    pub fn init(ident: &str, level: LevelFilter) -> Result<(), log::SetLoggerError> {
        let ident = CString::new(ident).unwrap_or_else(|_| CString::new("igmpproxy").unwrap());
        OPENLOG.call_once(|| unsafe {
            libc::openlog(ident.as_ptr(), libc::LOG_PID | libc::LOG_NDELAY, libc::LOG_DAEMON);
        });
        let logger = SyslogLogger { ident };
        log::set_boxed_logger(Box::new(logger))?;
        log::set_max_level(level);
        Ok(())
    }
}

fn syslog_priority(level: Level) -> libc::c_int {
    match level {
        Level::Error => libc::LOG_ERR,
        Level::Warn => libc::LOG_WARNING,
        Level::Info => libc::LOG_NOTICE,
        Level::Debug => libc::LOG_INFO,
        Level::Trace => libc::LOG_DEBUG,
    }
}

impl Log for SyslogLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!("{}: {}", record.target(), record.args());
        if let Ok(msg) = CString::new(line) {
            unsafe {
                libc::syslog(syslog_priority(record.level()), b"%s\0".as_ptr() as *const libc::c_char, msg.as_ptr());
            }
        }
    }

    fn flush(&self) {}
}

impl Drop for SyslogLogger {
    fn drop(&mut self) {
        unsafe {
            libc::closelog();
        }
        let _ = &self.ident;
    }
}
