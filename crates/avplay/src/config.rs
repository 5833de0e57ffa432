use std::path::Path;

use anyhow::{Context, Result};
use avsync::EngineConfig;

/// Loads engine tuning from a TOML file, or the defaults when no file is given.
pub fn load(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
    let cfg = toml::from_str::<EngineConfig>(&raw)
        .with_context(|| format!("parse config {:?}", path))?;
    tracing::info!(path = ?path, "engine config loaded");
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_gives_defaults() {
        let cfg = load(None).unwrap();
        assert_eq!(cfg.picture_queue_size, EngineConfig::default().picture_queue_size);
    }

    #[test]
    fn file_overrides_are_applied() {
        let path = std::env::temp_dir().join(format!("avplay-config-{}.toml", std::process::id()));
        std::fs::write(&path, "accurate_seek = true\nloop_count = 3\n").unwrap();
        let cfg = load(Some(&path)).unwrap();
        let _ = std::fs::remove_file(&path);
        assert!(cfg.accurate_seek);
        assert_eq!(cfg.loop_count, 3);
    }

    #[test]
    fn unreadable_file_names_the_path() {
        let err = load(Some(Path::new("/nonexistent/avplay.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("avplay.toml"));
    }
}
