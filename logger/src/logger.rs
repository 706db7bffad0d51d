//! Channel-backed file logger used across the workspace.
//!
//! Log lines are handed off to a background thread over an `mpsc` channel
//! so callers on the hot path (socket I/O, retry loops) never block on
//! file I/O themselves.
use chrono;
use std::{
    fmt::Display,
    fs::OpenOptions,
    io::Write,
    sync::mpsc::{Receiver, Sender, channel},
    thread::spawn,
};
/// Handle to the background writer thread.
#[derive(Debug, Clone)]
pub struct Logger {
    /// Sender to the writer thread
    pub logger: Sender<String>,
}

impl Logger {
    /// Spawns the writer thread and returns a handle that appends every
    /// logged message to `filename`.
    /// # Parameters
    /// * `filename`: path of the file to append log lines to
    pub fn new(filename: &str) -> Logger {
        let (logger, receiver) = channel();
        let filename = filename.to_string();

        spawn(move || {
            write_to_file(&filename, receiver);
        });

        Logger { logger }
    }

    /// A logger that discards everything it receives. Used for tests and
    /// for `--quiet` CLI runs.
    pub fn null() -> Self {
        let (sender, receiver) = channel::<String>();
        spawn(move || for _ in receiver {});
        Self { logger: sender }
    }

    /// Logs an info-level message.
    /// # Parameters
    /// * `message`: text to log
    /// * `module`: logical unit emitting the message
    pub fn info(&self, message: &str, module: &str) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[INFO] - {timestamp} - {module}: {message}");
        self.log(log_message.as_str());
    }

    /// Logs an error-level message.
    /// # Parameters
    /// * `message`: text to log
    /// * `module`: logical unit where the error occurred
    pub fn error(&self, message: &str, module: &str) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[ERROR] - {timestamp} - {module}: {message}");
        self.log(log_message.as_str());
    }

    /// Logs a warning-level message.
    /// # Parameters
    /// * `message`: text to log
    /// * `module`: logical unit emitting the message
    pub fn warn(&self, message: &str, module: &str) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[WARNING] - {timestamp} - {module}: {message}");
        self.log(log_message.as_str());
    }

    /// Logs a debug-level message together with an attached value.
    /// # Parameters
    /// * `message`: text to log
    /// * `module`: logical unit emitting the message
    /// * `data`: extra context for this particular case
    pub fn debug<T: Display>(&self, message: &str, module: &str, data: T) {
        let now = chrono::Local::now();
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let log_message = format!("[DEBUG] - {timestamp} - {module}: {message} - {data}");
        self.log(log_message.as_str());
    }

    /// Sends a message down the logger's channel.
    /// # Parameters
    /// * `message`: fully formatted log line
    fn log(&self, log_message: &str) {
        match self.logger.send(log_message.to_string()) {
            Ok(_) => {}
            Err(_) => {
                eprintln!("Error sending log message");
            }
        }
    }
}

/// Drains `receiver` and appends every message to `filename`, one line per
/// message, until the sending half is dropped.
///
/// # Parameters
/// * `filename`: path of the file to create/append to
/// * `receiver`: receiving end of the channel shared with the `Logger`
fn write_to_file(filename: &str, receiver: Receiver<String>) {
    let file = OpenOptions::new().create(true).append(true).open(filename);

    let mut file = match file {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Error opening log file: {e}");
            return;
        }
    };

    for message in receiver {
        if let Err(e) = writeln!(file, "{message}") {
            eprintln!("Error writing to log file: {e}");
        }
    }
}
