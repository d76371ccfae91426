use std::env;
use std::io::Write;
use std::path::Path;

use crate::error::{BridgeError, Result};

pub(crate) const ENV_PREFIX: &str = "BACKUP_BRIDGE_";

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_i64(name: &str, default: i64) -> Result<i64> {
    match env_optional(name) {
        Some(value) => value
            .trim()
            .parse::<i64>()
            .map_err(|_| BridgeError::InvalidArgument(format!("Invalid {name}: {value}"))),
        None => Ok(default),
    }
}

pub(crate) fn env_opt_i32(name: &str) -> Result<Option<i32>> {
    match env_optional(name) {
        Some(value) => value
            .trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|_| BridgeError::InvalidArgument(format!("Invalid {name}: {value}"))),
        None => Ok(None),
    }
}

pub(crate) fn env_bool(name: &str, default: bool) -> bool {
    match env_optional(name) {
        Some(value) => {
            let v = value.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "yes" | "y" | "on")
        }
        None => default,
    }
}

/// Install the `env_logger` sink. `RUST_LOG` wins; otherwise `info`, or `debug` when verbose.
pub(crate) fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}

pub(crate) fn blake3_hex(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Write through a sibling temp file and rename, so a failed run never leaves a half-written output.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| BridgeError::io(e, parent))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp_name);
    {
        let mut file = std::fs::File::create(&tmp).map_err(|e| BridgeError::io(e, &tmp))?;
        file.write_all(bytes).map_err(|e| BridgeError::io(e, &tmp))?;
        file.sync_all().map_err(|e| BridgeError::io(e, &tmp))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| BridgeError::io(e, path))?;
    Ok(())
}

/// Refuse to overwrite one of the inputs with the output.
pub(crate) fn ensure_distinct_output(out: &Path, inputs: &[&Path]) -> Result<()> {
    let out_canon = out.canonicalize().ok();
    for input in inputs {
        let same = match (&out_canon, input.canonicalize().ok()) {
            (Some(a), Some(b)) => *a == b,
            _ => out == *input,
        };
        if same {
            return Err(BridgeError::InvalidArgument(format!(
                "output {} would overwrite an input file",
                out.display()
            )));
        }
    }
    Ok(())
}
