//! Console output targets

use std::io::Write;

/// Where console text ends up.
///
/// The display coordinator writes through this trait so a live progress
/// renderer (or a test) can take over the terminal.
pub trait ConsoleOutput: Send + Sync {
    /// Regular console text. `text` usually ends with a newline.
    fn print(&self, text: &str);

    /// An error that must stay visible while progress is drawn.
    fn print_critical(&self, text: &str);
}

/// Writes regular text to stdout and critical panels to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalConsole;

impl ConsoleOutput for TerminalConsole {
    fn print(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn print_critical(&self, text: &str) {
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(critical_panel(text).as_bytes());
        let _ = err.flush();
    }
}

/// Frame `message` as a critical error block.
pub fn critical_panel(message: &str) -> String {
    let rule = "=".repeat(60);
    format!(
        "{rule}\n⚠️  Critical Error\n{}\n{rule}\n",
        message.trim_end()
    )
}
