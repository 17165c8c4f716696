use std::io::Write;

/// Where command handlers send what the user sees.
///
/// `--json` listings go through [`UserOutput::status`], which never styles
/// its text.
pub trait UserOutput: Send + Sync {
    /// Plain line, such as one row of `devhost list`
    fn status(&self, message: &str);

    /// "Started alpha on port 8080"
    fn success(&self, message: &str);

    /// Drift and other non-fatal findings, on stderr
    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    /// Start a line that [`UserOutput::finish_progress`] completes, as in
    /// "Stopping alpha... done".
    fn progress(&self, message: &str);

    fn finish_progress(&self, result: &str);

    fn blank(&self);
}

/// Terminal output with ANSI colours.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("\x1b[32m{}\x1b[0m", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("\x1b[33m{}\x1b[0m", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }

    fn progress(&self, message: &str) {
        print!("{}", message);
        std::io::stdout().flush().ok();
    }

    fn finish_progress(&self, result: &str) {
        println!("{}", result);
    }

    fn blank(&self) {
        println!();
    }
}
