//! Progress output stream shared by all long-running operations
//!
//! Provisioning steps run for minutes and report progress as discrete lines.
//! Producers (the orchestrator, the SSH executor) send `OutputLine`s through
//! an mpsc channel; the CLI drains the channel and prints them.

use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Output line type for coloring and prefixes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputType {
    Info,
    Success,
    Error,
    Warning,
    /// Raw remote stdout/stderr, printed without a level prefix
    Remote,
}

/// A single line of output
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub content: String,
    pub output_type: OutputType,
    pub timestamp: chrono::DateTime<Local>,
}

impl OutputLine {
    pub fn info(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            output_type: OutputType::Info,
            timestamp: Local::now(),
        }
    }

    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            output_type: OutputType::Success,
            timestamp: Local::now(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            output_type: OutputType::Error,
            timestamp: Local::now(),
        }
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            output_type: OutputType::Warning,
            timestamp: Local::now(),
        }
    }

    pub fn remote(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            output_type: OutputType::Remote,
            timestamp: Local::now(),
        }
    }
}

/// Spawn a task that prints every line from the channel to stdout.
///
/// Returns the sender half and the printer handle; await the handle after
/// dropping the sender to make sure the tail of the output is flushed.
pub fn spawn_printer(buffer: usize) -> (mpsc::Sender<OutputLine>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<OutputLine>(buffer);

    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let timestamp = line.timestamp.format("[%H:%M:%S]");
            match line.output_type {
                OutputType::Info => println!("{timestamp} {}", line.content),
                OutputType::Success => println!("{timestamp} OK: {}", line.content),
                OutputType::Warning => println!("{timestamp} WARN: {}", line.content),
                OutputType::Error => eprintln!("{timestamp} ERROR: {}", line.content),
                OutputType::Remote => println!("  | {}", line.content),
            }
        }
    });

    (tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_constructors() {
        assert_eq!(OutputLine::info("a").output_type, OutputType::Info);
        assert_eq!(OutputLine::success("a").output_type, OutputType::Success);
        assert_eq!(OutputLine::error("a").output_type, OutputType::Error);
        assert_eq!(OutputLine::warning("a").output_type, OutputType::Warning);
        assert_eq!(OutputLine::remote("a").output_type, OutputType::Remote);
    }
}
