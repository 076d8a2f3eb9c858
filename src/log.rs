//! Leveled diagnostic logging: a small `log!(LogLevel, "...", args)` macro
//! and threshold, generalised into a standalone module instead of being
//! wired to a single global tracee.

use lazy_static::lazy_static;
use std::env;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    LogDebug = 0,
    LogInfo = 1,
    LogWarn = 2,
    LogError = 3,
}

lazy_static! {
    static ref THRESHOLD: AtomicU8 = AtomicU8::new(init_threshold());
}

fn init_threshold() -> u8 {
    match env::var("TRACESYNTH_LOG").as_deref() {
        Ok("debug") => LogLevel::LogDebug as u8,
        Ok("warn") => LogLevel::LogWarn as u8,
        Ok("error") => LogLevel::LogError as u8,
        _ => LogLevel::LogInfo as u8,
    }
}

pub fn set_threshold(level: LogLevel) {
    THRESHOLD.store(level as u8, Ordering::Relaxed);
}

pub fn enabled(level: LogLevel) -> bool {
    level as u8 >= THRESHOLD.load(Ordering::Relaxed)
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::log::enabled($level) {
            match $level {
                $crate::log::LogLevel::LogError | $crate::log::LogLevel::LogWarn => {
                    eprintln!("[{:?}] {}", $level, format!($($arg)*));
                }
                _ => {
                    println!("[{:?}] {}", $level, format!($($arg)*));
                }
            }
        }
    };
}
