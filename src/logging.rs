//! Logger setup.
//!
//! Native builds (tests, headless hosting) use `env_logger`, honouring
//! `RUST_LOG` when set. The wasm build routes `log` records to the browser
//! console, tagged with the crate name so they can be filtered in devtools.

use log::LevelFilter;

/// Prefix on every console line
pub const LOG_TAG: &str = "[playrate]";

/// Install the process-wide logger. Safe to call more than once; later
/// calls only adjust the level.
pub fn init(level: LevelFilter) {
    #[cfg(not(target_arch = "wasm32"))]
    {
        let default_level = level.as_str().to_ascii_lowercase();
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .try_init();
    }

    #[cfg(target_arch = "wasm32")]
    {
        let _ = log::set_logger(&console::CONSOLE_LOGGER);
    }

    log::set_max_level(level);
}

#[cfg(target_arch = "wasm32")]
mod console {
    use super::LOG_TAG;
    use log::{Level, Log, Metadata, Record};
    use wasm_bindgen::JsValue;

    pub(super) static CONSOLE_LOGGER: ConsoleLogger = ConsoleLogger;

    pub(super) struct ConsoleLogger;

    impl Log for ConsoleLogger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= log::max_level()
        }

        fn log(&self, record: &Record) {
            if !self.enabled(record.metadata()) {
                return;
            }
            let line = JsValue::from_str(&format!("{} {}: {}", LOG_TAG, record.target(), record.args()));
            match record.level() {
                Level::Error => web_sys::console::error_1(&line),
                Level::Warn => web_sys::console::warn_1(&line),
                Level::Info => web_sys::console::info_1(&line),
                Level::Debug | Level::Trace => web_sys::console::debug_1(&line),
            }
        }

        fn flush(&self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        init(LevelFilter::Info);
        init(LevelFilter::Debug);
        log::debug!("logger initialised twice");
        assert_ne!(log::max_level(), LevelFilter::Off);
    }
}
