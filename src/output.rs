use crate::error::DbError;

/// Print a rendered result to stdout.
pub fn print_result(rendered: &str) {
    print!("{}", rendered);
}

/// The contract line for a failed command: `error: <category>: <message>`.
pub fn error_line(err: &DbError) -> String {
    match err.detail() {
        Some(detail) => format!("error: {} ({})", err, detail),
        None => format!("error: {}", err),
    }
}

/// Print error to stderr in the contract format.
pub fn print_error(err: &DbError) {
    eprintln!("{}", error_line(err));
}

/// Print a truncation warning to stderr for interactive visibility.
pub fn print_truncation_warning(message: &str) {
    eprintln!("warning: {}", message);
}
