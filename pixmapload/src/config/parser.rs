//! INI parsing logic for converting `Ini` → `LoaderConfig`.

use ini::Ini;
use std::path::PathBuf;

use super::defaults::UNBOUNDED_CAPACITY;
use super::file::ConfigFileError;
use super::LoaderConfig;
use crate::converter::MemoCapacity;

const SECTION: &str = "pixmap";

/// Parse an `Ini` object into a `LoaderConfig`.
///
/// Starts from `LoaderConfig::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<LoaderConfig, ConfigFileError> {
    let mut config = LoaderConfig::default();

    let Some(section) = ini.section(Some(SECTION)) else {
        return Ok(config);
    };

    if let Some(v) = section.get("workers") {
        let workers = v
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| invalid("workers", v, "expected a positive integer"))?;
        config = config.with_workers(workers);
    }

    if let Some(v) = section.get("memo_capacity") {
        let capacity = parse_capacity(v).ok_or_else(|| {
            invalid(
                "memo_capacity",
                v,
                "expected a positive integer or 'unbounded'",
            )
        })?;
        config = config.with_memo_capacity(capacity);
    }

    if let Some(v) = section.get("image_root") {
        let v = v.trim();
        if !v.is_empty() {
            config = config.with_image_root(expand_tilde(v));
        }
    }

    Ok(config)
}

fn parse_capacity(value: &str) -> Option<MemoCapacity> {
    let value = value.trim();
    if value.eq_ignore_ascii_case(UNBOUNDED_CAPACITY) {
        return Some(MemoCapacity::Unbounded);
    }
    value.parse::<usize>().ok().and_then(MemoCapacity::bounded)
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: SECTION.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Expand a leading `~/` to the home directory.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
