//! Diagnostic line appender.
//!
//! Match functions describe their hits through this trait; the collector
//! (a DNS response section, a log, a test buffer) lives outside the core.

use std::fmt::Arguments;

pub trait Xray {
    fn append(&self, line: Arguments<'_>);
}

/// Discards every line; the production default when tracing is off.
pub struct NoXray;

impl Xray for NoXray {
    fn append(&self, _line: Arguments<'_>) {}
}

/// Collects lines into a buffer; used by tests and interactive diagnosis.
#[derive(Default)]
pub struct BufferXray {
    lines: parking_lot::Mutex<Vec<String>>,
}

impl BufferXray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut self.lines.lock())
    }
}

impl Xray for BufferXray {
    fn append(&self, line: Arguments<'_>) {
        self.lines.lock().push(line.to_string());
    }
}

/// Append a formatted diagnostic line if an xray sink is attached.
#[macro_export]
macro_rules! xray {
    ($x:expr, $($arg:tt)*) => {
        if let Some(x) = $x {
            $crate::xray::Xray::append(x, format_args!($($arg)*));
        }
    };
}
