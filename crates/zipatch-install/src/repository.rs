//! Install component version bookkeeping
//!
//! Each patchable component tracks its version in a plain-text `.ver` file,
//! with a `.bck` twin written at the same time so a torn update can be told
//! apart from a clean one.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Result};

/// Version every component starts from before any patch has been applied.
pub const BASE_VERSION: &str = "2012.01.01.0000.0000";

/// One patchable component of an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Repository {
    /// Bootstrap/launcher files.
    Boot,
    /// Base game client.
    Game,
    /// Expansion pack `ex{n}`.
    Expansion(u8),
}

impl Repository {
    fn version_file_base(self) -> String {
        match self {
            Self::Boot => "ffxivboot".to_owned(),
            Self::Game => "ffxivgame".to_owned(),
            Self::Expansion(n) => format!("sqpack/ex{n}/ex{n}"),
        }
    }

    pub fn version_file(self, root: &Path) -> PathBuf {
        root.join(self.version_file_base() + ".ver")
    }

    pub fn backup_version_file(self, root: &Path) -> PathBuf {
        root.join(self.version_file_base() + ".bck")
    }

    /// Read the component's version, falling back to [`BASE_VERSION`] when
    /// the version file is absent or blank.
    pub fn version(self, root: &Path) -> Result<String> {
        let path = self.version_file(root);
        match fs::read_to_string(&path) {
            Ok(version) if !version.trim().is_empty() => Ok(version.trim().to_owned()),
            Ok(_) => Ok(BASE_VERSION.to_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BASE_VERSION.to_owned()),
            Err(source) => Err(Error::Target { path, source }),
        }
    }

    /// Write both version files atomically enough for our purposes: `.ver`
    /// first, `.bck` second.
    pub fn set_version(self, root: &Path, version: &str) -> Result<()> {
        for path in [self.version_file(root), self.backup_version_file(root)] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| Error::Target {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            fs::write(&path, version).map_err(|source| Error::Target { path, source })?;
        }
        debug!(repository = ?self, version, "version files written");
        Ok(())
    }
}
