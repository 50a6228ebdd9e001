use std::path::PathBuf;
use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use crate::config::CONFIG_FILE_NAME;

pub fn get_global_config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("org", "databio", "bulker")
        .ok_or_else(|| anyhow!("Could not get project directories"))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Config used when neither `--config` nor `BULKERCFG` is given.
pub fn get_default_config_path() -> Result<PathBuf> {
    Ok(get_global_config_dir()?.join(CONFIG_FILE_NAME))
}

/// Picks the config file: an explicit path wins, otherwise the per-user default.
pub fn select_config(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => get_default_config_path(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_config_prefers_explicit_path() {
        let explicit = PathBuf::from("/etc/bulker/custom.yaml");
        assert_eq!(select_config(Some(explicit.clone())).unwrap(), explicit);
    }

    #[test]
    fn test_default_config_file_name() {
        if let Ok(path) = get_default_config_path() {
            assert!(path.ends_with(CONFIG_FILE_NAME));
        }
    }
}
