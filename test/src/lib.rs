//! Testing utilities for the address manager.
pub mod arbitrary;
pub mod gen;

pub mod logger {
    use log::*;

    struct Logger {
        level: Level,
    }

    impl Log for Logger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            if self.enabled(record.metadata()) {
                println!(
                    "test> {:<5} [{}] {}",
                    record.level(),
                    record.target(),
                    record.args()
                )
            }
        }

        fn flush(&self) {}
    }

    /// Install the test logger. Subsequent calls are no-ops.
    pub fn init(level: Level) {
        let logger = Logger { level };

        log::set_boxed_logger(Box::new(logger)).ok();
        log::set_max_level(level.to_level_filter());
    }
}
