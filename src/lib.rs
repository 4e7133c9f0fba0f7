use core::fmt;
use std::io::{self, Write};
use std::process::{ExitCode, Termination};

use colored::Colorize;
use log::{Level, LevelFilter, Metadata, Record, error};

pub mod coeffs;
pub mod error;
pub mod filter_kit;
pub mod resampler;
pub mod stream;

pub use coeffs::{FilterTable, NPC, Quality};
pub use error::ResampleError;
pub use resampler::{InputProducer, OutputConsumer, Resampler, SliceConsumer, SliceProducer};
pub use stream::{
    StreamResampler, calc_factor, calc_input_rate, calc_output_rate, expected_output_len,
};

/// Exit-status wrapper for `main`, logging the error before the process
/// reports failure.
pub struct TermResult(pub Result<(), Box<dyn std::error::Error>>);

impl Termination for TermResult {
    fn report(self) -> ExitCode {
        match self.0 {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                error!("{}", err);
                ExitCode::FAILURE
            }
        }
    }
}

impl fmt::Debug for TermResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Ok(()) => write!(f, "Ok"),
            Err(e) => write!(f, "Err({})", e),
        }
    }
}

/// Colored stderr logger for the CLI.
#[derive(Clone)]
pub struct ColorLogger {
    max_level: LevelFilter,
}

impl ColorLogger {
    pub fn new(quiet: bool, verbose: bool) -> Self {
        let max_level = if quiet {
            LevelFilter::Off
        } else if verbose {
            LevelFilter::Trace
        } else {
            LevelFilter::Info
        };
        Self { max_level }
    }
}

impl log::Log for ColorLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            match record.level() {
                Level::Error => eprintln!(
                    "{} {}",
                    "[ERROR]".red().bold(),
                    format!("{}", record.args()).red().bold()
                ),
                Level::Warn => eprintln!(
                    "{} {}",
                    "[WARN]".yellow().bold(),
                    format!("{}", record.args()).yellow().bold()
                ),
                _ => eprintln!(
                    "[{}] {}",
                    record.level().to_string().blue(),
                    record.args()
                ),
            }
        }
        self.flush();
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}
