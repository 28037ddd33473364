use std::{env, path::Path};

use tracing::warn;

/// Model used when neither `--model` nor `CHAT_STREAM_MODEL` is set.
pub const DEFAULT_MODEL: &str = "claude-3-haiku-20240307";

/// Load `.env` files into the process environment.
///
/// The crate-local file is read first, then the one in the working directory;
/// variables already set are never overwritten.
pub fn init() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

/// Get and parse an environment variable. Unset, blank or unparsable values
/// yield `None`.
pub fn get_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!(key, "ignoring unparsable environment variable");
            None
        }
    }
}

/// Resolves the model name: flag, then `CHAT_STREAM_MODEL`, then the default.
pub fn resolve_model(flag: Option<String>) -> String {
    flag.filter(|m| !m.trim().is_empty())
        .or_else(|| get_env::<String>("CHAT_STREAM_MODEL"))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}
