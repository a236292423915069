use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Local;
use parking_lot::Mutex;

fn current_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Report sink. Every line goes to stderr, and additionally to an append-mode
/// log file when one was requested on the command line.
pub struct Log {
    file: Option<Mutex<File>>,
}

impl Log {
    pub fn to_stderr() -> Self {
        Log { file: None }
    }

    pub fn with_file(path: &Path) -> std::io::Result<Self> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Log {
            file: Some(Mutex::new(f)),
        })
    }

    pub fn info<S: AsRef<str>>(&self, msg: S) {
        self.emit(msg.as_ref());
    }

    pub fn error<S: AsRef<str>>(&self, msg: S) {
        self.emit(&format!("error: {}", msg.as_ref()));
    }

    fn emit(&self, msg: &str) {
        let line = format!("[{}] {}", current_timestamp(), msg);
        eprintln!("{}", line);
        if let Some(ref lf) = self.file {
            let mut guard = lf.lock();
            let _ = writeln!(*guard, "{}", line);
            let _ = guard.flush();
        }
    }
}
