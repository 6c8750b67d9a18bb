//! Show or write the effective configuration.

use std::path::Path;

use sightline_common::config::{config_file_path, AppConfig};

pub fn run(config: &AppConfig, path: Option<&Path>, init: bool) -> anyhow::Result<()> {
    let shown = path.map(Path::to_path_buf).unwrap_or_else(config_file_path);
    if !init {
        println!("# {}", shown.display());
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    if shown.exists() {
        anyhow::bail!("{} already exists; remove it first", shown.display());
    }
    match path {
        Some(path) => config.save_to(path)?,
        None => config.save()?,
    }
    tracing::info!(path = %shown.display(), "Config written");
    println!("Wrote {}", shown.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");
        let mut config = AppConfig::default();
        config.export.min_video_bytes = 2048;

        run(&config, Some(&path), true).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.export.min_video_bytes, 2048);
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        let err = run(&AppConfig::default(), Some(&path), true).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }
}
