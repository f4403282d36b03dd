//! Per-environment cache file
//!
//! A single YAML document per environment is the source of truth between
//! invocations. The file is observed by external watchers, so writes are
//! suppressed when the logical status is unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{HolodeckError, Result};

use super::Environment;

/// Handle to the environment's cache file.
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    /// Derive the cache path from the environment name:
    /// `<root>/holodeck/<name>.yaml`, root defaulting to the user cache dir.
    pub fn for_environment(cache_root: Option<&Path>, name: &str) -> Result<Self> {
        let root = match cache_root {
            Some(root) => root.to_path_buf(),
            None => dirs::cache_dir().ok_or_else(|| {
                HolodeckError::ConfigInvalid("cannot determine user cache directory".to_string())
            })?,
        };
        Ok(Self {
            path: root.join("holodeck").join(format!("{name}.yaml")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Environment> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| HolodeckError::io(self.path.clone(), e))?;
        serde_yaml::from_str(&content).map_err(|e| {
            HolodeckError::ConfigInvalid(format!(
                "cache file {} is not a valid environment document: {e}",
                self.path.display()
            ))
        })
    }

    /// Persist the environment unless the previously written document is
    /// logically identical (conditions compared without timestamps).
    /// Returns whether a write happened.
    pub fn write_if_changed(&self, env: &Environment) -> Result<bool> {
        if let Ok(previous) = self.load() {
            if previous.spec == env.spec && previous.status.logically_equal(&env.status) {
                return Ok(false);
            }
        }
        self.write(env)?;
        Ok(true)
    }

    fn write(&self, env: &Environment) -> Result<()> {
        let parent = self
            .path
            .parent()
            .expect("cache path always has a parent directory");
        fs::create_dir_all(parent).map_err(|e| HolodeckError::io(parent.to_path_buf(), e))?;

        let content = serde_yaml::to_string(env).map_err(|e| {
            HolodeckError::ConfigInvalid(format!("failed to serialise environment: {e}"))
        })?;

        // Write to a temp file in the same directory, then move into place
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, content).map_err(|e| HolodeckError::io(tmp.clone(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&tmp)
                .map_err(|e| HolodeckError::io(tmp.clone(), e))?
                .permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&tmp, perms).map_err(|e| HolodeckError::io(tmp.clone(), e))?;
        }

        fs::rename(&tmp, &self.path).map_err(|e| HolodeckError::io(self.path.clone(), e))?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HolodeckError::io(self.path.clone(), e)),
        }
    }
}
