use crate::cli::OutputFormat;
use crate::error::DbError;
use crate::normalize::CanonicalResult;
use serde::Serialize;

fn encode_error(e: impl std::fmt::Display) -> DbError {
    DbError::Io(std::io::Error::other(format!("cannot encode output: {}", e)))
}

/// Pretty JSON, the default rendering.
pub fn to_json<T: Serialize>(value: &T) -> Result<String, DbError> {
    let mut out = serde_json::to_string_pretty(value).map_err(encode_error)?;
    out.push('\n');
    Ok(out)
}

/// TOON rendering of any serializable value.
pub fn to_toon<T: Serialize>(value: &T) -> Result<String, DbError> {
    let json = serde_json::to_value(value).map_err(encode_error)?;
    let mut out = toon_format::encode_default(&json).map_err(encode_error)?;
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Ok(out)
}

pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String, DbError> {
    match format {
        OutputFormat::Json => to_json(value),
        OutputFormat::Toon => to_toon(value),
    }
}

/// Warning text for a row set cut by the row limit, if it was cut.
pub fn truncation_notice(result: &CanonicalResult) -> Option<String> {
    match result {
        CanonicalResult::RowSet {
            rows,
            truncated: true,
            ..
        } => Some(format!(
            "showing {} rows; use --row-limit or --no-limit to return more",
            rows.len()
        )),
        _ => None,
    }
}
