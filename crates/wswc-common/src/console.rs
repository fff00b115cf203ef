// console.rs -- diagnostics sink supplied by the host
//
// Every warning and trace message the library emits goes through this trait;
// the host decides whether it ends up on stdout, in a log file or nowhere.

use std::fmt;
use std::sync::Arc;

pub trait Console: Send + Sync {
    fn vprintf(&self, args: fmt::Arguments<'_>);

    fn printf(&self, message: &str) {
        self.vprintf(format_args!("{}", message));
    }
}

/// Shared handle the library threads a console around with.
pub type ConsoleRef = Arc<dyn Console>;

/// Writes every message to stdout, prefixed with a fixed tag.
pub struct TaggedConsole {
    tag: &'static str,
}

impl TaggedConsole {
    pub fn new(tag: &'static str) -> Self {
        Self { tag }
    }
}

impl Console for TaggedConsole {
    fn vprintf(&self, args: fmt::Arguments<'_>) {
        print!("{}: {}", self.tag, args);
    }
}

/// Swallows everything. Handy for tests.
pub struct NullConsole;

impl Console for NullConsole {
    fn vprintf(&self, _args: fmt::Arguments<'_>) {}
}
