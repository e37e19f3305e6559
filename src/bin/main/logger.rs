use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use log::{LevelFilter, Log, Metadata, Record};
use smartclock_core::log_ring::LogRing;

static LOG_RING: Mutex<RefCell<LogRing>> = Mutex::new(RefCell::new(LogRing::new()));
static LOGGER: RingLogger = RingLogger;

/// Console logger that also keeps the most recent lines for `GET /log`.
struct RingLogger;

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        esp_println::println!("{} - {}", record.level(), record.args());
        critical_section::with(|cs| {
            LOG_RING
                .borrow_ref_mut(cs)
                .push_fmt(format_args!("{} {}", record.level(), record.args()));
        });
    }

    fn flush(&self) {}
}

pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Copies the retained lines, oldest first.
pub fn write_recent<W: fmt::Write>(out: &mut W) -> fmt::Result {
    critical_section::with(|cs| LOG_RING.borrow_ref(cs).write_to(out))
}
