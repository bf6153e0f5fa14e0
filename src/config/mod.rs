pub mod resolv;
pub mod types;

use anyhow::Result;
use std::path::Path;

pub use types::{ClientTimeouts, ServerConfig, Settings, DEFAULT_RESOLV_CONF};

/// 从 YAML 文件读取设置；未出现的字段取默认值
pub fn load_settings(path: &str) -> Result<Settings> {
    let content = std::fs::read_to_string(Path::new(path))?;
    let settings: Settings = if content.trim().is_empty() {
        Settings::default()
    } else {
        serde_yml::from_str(&content)?
    };
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_settings_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostres.yaml");
        std::fs::write(
            &path,
            "timeout-secs: 2\ncleanup-interval-secs: 120\nmdns-timeout-secs: 1\n",
        )
        .unwrap();

        let settings = load_settings(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.timeout_secs, 2);
        assert_eq!(settings.cleanup_interval_secs, 120);
        assert_eq!(settings.mdns_timeout_secs, 1);
        assert_eq!(settings.resolv_conf, DEFAULT_RESOLV_CONF);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "").unwrap();
        let settings = load_settings(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.cache_ttl_secs, 86400);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "cleanup-interval-secs: 0\n").unwrap();
        assert!(load_settings(path.to_str().unwrap()).is_err());
    }
}
