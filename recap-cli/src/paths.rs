use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.yaml";

pub fn recap_home() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".recap"))
}

/// `--config`, else `<cwd>/config.yaml`, else `<home>/config.yaml`.
///
/// The last candidate is returned even when it does not exist so the caller
/// can report where it looked.
pub fn resolve_config_path(cli_value: Option<PathBuf>, cwd: &Path, home: &Path) -> PathBuf {
    if let Some(path) = cli_value {
        return path;
    }
    let local = cwd.join(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    home.join(CONFIG_FILE_NAME)
}

pub fn config_path(cli_value: Option<PathBuf>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("read current directory")?;
    Ok(resolve_config_path(cli_value, &cwd, &recap_home()?))
}

/// Relative paths in the config file are relative to the file itself.
pub fn relative_to_config(config_path: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        return value.to_path_buf();
    }
    config_path
        .parent()
        .map(|dir| dir.join(value))
        .unwrap_or_else(|| value.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_cli_value_wins() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();
        let chosen = resolve_config_path(Some(PathBuf::from("/etc/recap.yaml")), dir.path(), Path::new("/home"));
        assert_eq!(chosen, PathBuf::from("/etc/recap.yaml"));
    }

    #[test]
    fn test_cwd_then_home() {
        let cwd = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_config_path(None, cwd.path(), home.path()),
            home.path().join(CONFIG_FILE_NAME)
        );

        fs::write(cwd.path().join(CONFIG_FILE_NAME), "").unwrap();
        assert_eq!(
            resolve_config_path(None, cwd.path(), home.path()),
            cwd.path().join(CONFIG_FILE_NAME)
        );
    }

    #[test]
    fn test_relative_to_config() {
        let config = Path::new("/srv/recap/config.yaml");
        assert_eq!(
            relative_to_config(config, Path::new("logs/run.log")),
            PathBuf::from("/srv/recap/logs/run.log")
        );
        assert_eq!(
            relative_to_config(config, Path::new("/var/log/recap.log")),
            PathBuf::from("/var/log/recap.log")
        );
    }
}
