//! Thin wrapper around `env_logger::Logger` so log initialization mirrors
//! the rest of the ambient stack rather than calling `env_logger::init()`
//! directly, leaving room for future log-destination switching (stderr vs.
//! `-l FILE`).

use env_logger::Logger;
use log::SetLoggerError;

pub struct LogWrapper(pub Logger);

impl log::Log for LogWrapper {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.0.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        self.0.log(record)
    }

    fn flush(&self) {
        self.0.flush()
    }
}

impl LogWrapper {
    pub fn try_init(self) -> Result<(), SetLoggerError> {
        let max_filter_level = self.0.filter();

        log::set_boxed_logger(Box::new(self))?;

        log::set_max_level(max_filter_level);

        Ok(())
    }
}
