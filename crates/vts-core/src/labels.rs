use std::path::Path;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Raw key NGINX uses for the aggregate of all server zones.
pub const WILDCARD: &str = "*";
/// Display label used for [`WILDCARD`] entities.
pub const TOTAL_LABEL: &str = "Total";
/// Munin truncates long labels badly; keep the short label readable.
pub const SHORT_LABEL_MAX: usize = 15;

const UNIX_SCHEME: &str = "unix:";

/// Turn an arbitrary entity name into a Munin field name.
///
/// Accented letters are folded to their ASCII base letter (NFKD with the
/// combining marks dropped), everything else outside `[A-Za-z0-9]` becomes
/// `_`, letters are lower-cased and a leading digit gets a `_` prefix.
/// Never returns an empty string.
pub fn sanitize_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len() + 1);
    for c in name.nfkd().filter(|c| !is_combining_mark(*c)) {
        if c.is_ascii_alphanumeric() {
            key.push(c.to_ascii_lowercase());
        } else {
            key.push('_');
        }
    }
    if key.is_empty() {
        key.push('_');
    } else if key.starts_with(|c: char| c.is_ascii_digit()) {
        key.insert(0, '_');
    }
    key
}

/// Human readable form of an entity name: `unix:/run/app.sock` becomes
/// `app.sock`. Only used for labels, never for keys.
pub fn cleanup_name(name: &str) -> String {
    let rest = name.strip_prefix(UNIX_SCHEME).unwrap_or(name);
    if rest.starts_with('/') {
        if let Some(last) = Path::new(rest).file_name() {
            return last.to_string_lossy().into_owned();
        }
    }
    rest.to_string()
}

/// Full display name, with the wildcard zone shown as `Total`.
pub fn display_name(name: &str) -> String {
    if name == WILDCARD {
        TOTAL_LABEL.to_string()
    } else {
        cleanup_name(name)
    }
}

/// Display name truncated to [`SHORT_LABEL_MAX`] characters.
pub fn short_label(name: &str) -> String {
    display_name(name).chars().take(SHORT_LABEL_MAX).collect()
}
