use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database: PathBuf,
    /// Root directory holding uploaded lesson resource files.
    pub media_root: PathBuf,
    /// Log directory; stdout when unset.
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./database/course.db"),
            media_root: PathBuf::from("./media"),
            log_dir: None,
        }
    }
}
