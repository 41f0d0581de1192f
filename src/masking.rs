use std::fmt;

use secrecy::{ExposeSecret, SecretString};

pub const REDACTED: &str = "[REDACTED]";
pub const NOT_SET: &str = "(not set)";

/// Display adapter for an optional credential in diagnostics.
///
/// Prints `[REDACTED]` unless `show` is set, and `(not set)` when there is no credential.
#[derive(Clone, Copy)]
pub struct Masked<'a> {
    secret: Option<&'a SecretString>,
    show: bool,
}

impl<'a> Masked<'a> {
    pub fn new(secret: Option<&'a SecretString>, show: bool) -> Self {
        Self { secret, show }
    }
}

impl fmt::Display for Masked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.secret {
            None => f.write_str(NOT_SET),
            Some(s) if self.show => f.write_str(s.expose_secret()),
            Some(_) => f.write_str(REDACTED),
        }
    }
}

impl fmt::Debug for Masked<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug never exposes, whatever `show` says.
        match self.secret {
            None => f.write_str(NOT_SET),
            Some(_) => f.write_str(REDACTED),
        }
    }
}
