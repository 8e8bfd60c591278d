//! The remote file naming convention: a note at `(context, date =
//! YYYY-MM-DD)` lives at `<context>/<DD-MM-YYYY>.md` on the remote. Local
//! dates are `YYYY-MM-DD`; this module is the only place that swaps the two
//! formats.

use chrono::NaiveDate;

const LOCAL_FMT: &str = "%Y-%m-%d";
const REMOTE_FMT: &str = "%d-%m-%Y";

/// Turn a local `YYYY-MM-DD` date into the remote file stem (no extension).
///
/// Returns `None` if `date` isn't a valid calendar day — callers should
/// treat that as a programmer error on write, since the Note Store only
/// ever hands out dates it validated on the way in.
pub fn to_remote_file_stem(date: &str) -> Option<String> {
    let parsed = NaiveDate::parse_from_str(date, LOCAL_FMT).ok()?;
    Some(parsed.format(REMOTE_FMT).to_string())
}

/// Invert a remote file stem (e.g. `18-10-2025`, with or without a `.md`
/// suffix already stripped) back into a local `YYYY-MM-DD` date.
///
/// Returns `None` for any name that doesn't parse as `DD-MM-YYYY` — callers
/// (the bulk importer) should skip such files rather than fail the import.
pub fn from_remote_file_stem(stem: &str) -> Option<String> {
    let parsed = NaiveDate::parse_from_str(stem, REMOTE_FMT).ok()?;
    Some(parsed.format(LOCAL_FMT).to_string())
}

/// Strip a trailing `.md` extension, if present.
pub fn strip_md_extension(file_name: &str) -> &str {
    file_name.strip_suffix(".md").unwrap_or(file_name)
}
