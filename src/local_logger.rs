use std::{
    env,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::prelude::*;
use console::{Style, style};
use indicatif::{ProgressBar, ProgressStyle};
use lazy_static::lazy_static;
use log::Log;
use simplelog::{CombinedLogger, SharedLogger};
use std::io::Write;

use crate::logger::{GroupEvent, get_group_event};

pub const HOST_U8_COLOR_CODE: u8 = 39; // #00AFFF
pub const LOG_LEVEL_ENV: &str = "MIGRATION_HOST_LOG";

lazy_static! {
    /// The spinner of the current log group, or the progress bar of the current extraction.
    pub static ref ACTIVE_BAR: Arc<Mutex<Option<ProgressBar>>> = Arc::new(Mutex::new(None));
    /// Every log line goes to stderr: stdout is reserved for the bridge protocol.
    pub static ref IS_TTY: bool = std::io::IsTerminal::is_terminal(&std::io::stderr());
}

/// Hide the active bar temporarily, execute `f`, then redraw the bar.
///
/// If the output is not a TTY, `f` will be executed without hiding anything.
pub fn suspend_progress_bar<F: FnOnce() -> R, R>(f: F) -> R {
    if *IS_TTY {
        if let Ok(mut bar) = ACTIVE_BAR.lock() {
            if let Some(bar) = bar.as_mut() {
                return bar.suspend(f);
            }
        }
    }

    f()
}

fn replace_active_bar(bar: ProgressBar) {
    if let Ok(mut active) = ACTIVE_BAR.lock() {
        if let Some(previous) = active.replace(bar) {
            previous.finish_and_clear();
        }
    }
}

/// Show a percentage bar for a long running task. Only drawn on a TTY.
pub fn start_progress_bar(message: &str) {
    if !*IS_TTY {
        return;
    }
    let bar = ProgressBar::new(100);
    if let Ok(bar_style) = ProgressStyle::with_template(&format!(
        "  {{bar:40.{HOST_U8_COLOR_CODE}}} {{pos:>3}}% {{wide_msg}}"
    )) {
        bar.set_style(bar_style);
    }
    bar.set_message(message.to_owned());
    replace_active_bar(bar);
}

pub fn update_progress_bar(percentage: f64, message: &str) {
    if let Ok(mut active) = ACTIVE_BAR.lock() {
        if let Some(bar) = active.as_mut() {
            bar.set_position(percentage.round() as u64);
            bar.set_message(message.to_owned());
        }
    }
}

pub struct LocalLogger {
    log_level: log::LevelFilter,
}

impl LocalLogger {
    pub fn new() -> Self {
        let log_level = env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|log_level| log_level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info);

        LocalLogger { log_level }
    }
}

impl Log for LocalLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.log_level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Some(group_event) = get_group_event(record) {
            match group_event {
                GroupEvent::Start(name) => {
                    eprintln!(
                        "\n{}",
                        style(format!("►►► {name} "))
                            .bold()
                            .color256(HOST_U8_COLOR_CODE)
                    );

                    if *IS_TTY {
                        let spinner = ProgressBar::new_spinner();
                        if let Ok(spinner_style) = ProgressStyle::with_template(&format!(
                            "  {{spinner:>.{HOST_U8_COLOR_CODE}}} {{wide_msg:.{HOST_U8_COLOR_CODE}.bold}}"
                        )) {
                            spinner.set_style(spinner_style);
                        }
                        spinner.set_message(format!("{name}..."));
                        spinner.enable_steady_tick(Duration::from_millis(100));
                        replace_active_bar(spinner);
                    } else {
                        eprintln!("{name}...");
                    }
                }
                GroupEvent::End => clean_logger(),
            }

            return;
        }

        suspend_progress_bar(|| print_record(record));
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Print a log record to the console with the appropriate style
fn print_record(record: &log::Record) {
    let error_style = Style::new().red();
    let info_style = Style::new().white();
    let warn_style = Style::new().yellow();
    let debug_style = Style::new().blue().dim();
    let trace_style = Style::new().black().dim();

    match record.level() {
        log::Level::Error => eprintln!("{}", error_style.apply_to(record.args())),
        log::Level::Warn => eprintln!("{}", warn_style.apply_to(record.args())),
        log::Level::Info => eprintln!("{}", info_style.apply_to(record.args())),
        log::Level::Debug => eprintln!(
            "{}",
            debug_style.apply_to(format!("[DEBUG::{}] {}", record.target(), record.args())),
        ),
        log::Level::Trace => eprintln!(
            "{}",
            trace_style.apply_to(format!("[TRACE::{}] {}", record.target(), record.args()))
        ),
    }
}

impl SharedLogger for LocalLogger {
    fn level(&self) -> log::LevelFilter {
        self.log_level
    }

    fn config(&self) -> Option<&simplelog::Config> {
        None
    }

    fn as_log(self: Box<Self>) -> Box<dyn Log> {
        Box::new(*self)
    }
}

pub fn get_local_logger() -> Box<dyn SharedLogger> {
    Box::new(LocalLogger::new())
}

pub fn init_local_logger() -> Result<()> {
    let logger = get_local_logger();
    CombinedLogger::init(vec![logger])?;
    Ok(())
}

pub fn clean_logger() {
    if let Ok(mut active) = ACTIVE_BAR.lock() {
        if let Some(bar) = active.take() {
            bar.finish_and_clear();
        }
    }
}
