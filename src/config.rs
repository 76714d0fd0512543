//! Executable-relative run paths and the optional `configs.conf` file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::constants::{DEFAULT_PEER_SLOTS, DEFAULT_PORT};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot locate the executable's directory")]
    NoExeDir,
}

/// Where this run keeps its data, derived once at startup from the
/// executable's directory and passed around by reference.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    pub downloads_dir: PathBuf,
    pub config_file: PathBuf,
}

impl RunPaths {
    /// Paths next to the running executable.
    pub fn from_exe() -> Result<Self, ConfigError> {
        let exe = std::env::current_exe()?;
        let root = exe
            .parent()
            .ok_or(ConfigError::NoExeDir)?
            .to_path_buf();
        Ok(Self::under(root))
    }

    /// Paths under an arbitrary root. Tests use this with a tempdir.
    pub fn under(root: PathBuf) -> Self {
        Self {
            cache_dir: root.join("cache"),
            downloads_dir: root.join("downloads"),
            config_file: root.join("configs.conf"),
            root,
        }
    }

    /// Creates the cache and downloads directories.
    pub fn prepare(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.cache_dir)?;
        fs::create_dir_all(&self.downloads_dir)?;
        Ok(())
    }

    /// Copies the metainfo file into the cache, once.
    pub fn cache_metainfo(&self, torrent_path: &Path) -> Result<(), ConfigError> {
        let Some(name) = torrent_path.file_name() else {
            return Ok(());
        };
        let destination = self.cache_dir.join(name);
        if !destination.exists() {
            fs::copy(torrent_path, destination)?;
        }
        Ok(())
    }
}

/// Settings from `configs.conf`: `key=value` per line, whitespace around
/// keys ignored, unknown keys tolerated. Every setting has a default, so a
/// missing file is fine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Peer slot count.
    pub max_peers: usize,
    /// Listen port reported to trackers.
    pub port: u16,
    /// Peer count requested from trackers.
    pub numwant: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_peers: DEFAULT_PEER_SLOTS,
            port: DEFAULT_PORT,
            numwant: None,
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Self::default();
        };
        Self::parse(&text)
    }

    fn parse(text: &str) -> Self {
        let mut settings = Self::default();
        for line in text.lines() {
            let Some((raw_key, raw_value)) = line.split_once('=') else {
                continue;
            };
            let key: String = raw_key.chars().filter(|c| !c.is_whitespace()).collect();
            let value = raw_value.trim();
            match key.as_str() {
                "max_peers" => {
                    if let Ok(n) = value.parse::<usize>() {
                        if n > 0 {
                            settings.max_peers = n;
                        }
                    }
                }
                "port" => {
                    if let Ok(p) = value.parse() {
                        settings.port = p;
                    }
                }
                "numwant" => settings.numwant = value.parse().ok(),
                _ => debug!(key = %key, value, "ignoring unknown config key"),
            }
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let settings = Settings::load(Path::new("/nonexistent/configs.conf"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn parses_known_keys_with_loose_whitespace() {
        let settings = Settings::parse("  max _ peers = 25\nport=7000\nnumwant = 40\n");
        assert_eq!(settings.max_peers, 25);
        assert_eq!(settings.port, 7000);
        assert_eq!(settings.numwant, Some(40));
    }

    #[test]
    fn unknown_keys_and_junk_lines_are_ignored() {
        let settings = Settings::parse("color=blue\nnot a pair\nmax_peers=bogus\n");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn zero_max_peers_is_rejected() {
        let settings = Settings::parse("max_peers=0\n");
        assert_eq!(settings.max_peers, DEFAULT_PEER_SLOTS);
    }

    #[test]
    fn run_paths_layout() {
        let paths = RunPaths::under(PathBuf::from("/tmp/app"));
        assert_eq!(paths.cache_dir, PathBuf::from("/tmp/app/cache"));
        assert_eq!(paths.downloads_dir, PathBuf::from("/tmp/app/downloads"));
        assert_eq!(paths.config_file, PathBuf::from("/tmp/app/configs.conf"));
    }

    #[test]
    fn cache_metainfo_copies_once() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = RunPaths::under(temp.path().to_path_buf());
        paths.prepare().unwrap();

        let torrent = temp.path().join("t.torrent");
        std::fs::write(&torrent, b"first").unwrap();
        paths.cache_metainfo(&torrent).unwrap();

        std::fs::write(&torrent, b"second").unwrap();
        paths.cache_metainfo(&torrent).unwrap();

        let cached = std::fs::read(paths.cache_dir.join("t.torrent")).unwrap();
        assert_eq!(cached, b"first");
    }
}
