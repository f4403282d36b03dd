//! Environment file loading
//!
//! Finds, parses, and validates the declarative environment file.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::types::EnvironmentSpec;
use super::validator;

/// Environment file loader
pub struct EnvFileLoader {
    env_file: Option<PathBuf>,
}

impl EnvFileLoader {
    pub fn new(env_file: Option<&str>) -> Self {
        Self {
            env_file: env_file.map(PathBuf::from),
        }
    }

    /// Load, parse and validate the environment file
    pub fn load(&self) -> Result<EnvironmentSpec> {
        let path = self.find_env_file()?;

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read environment file: {}", path.display()))?;

        let spec: EnvironmentSpec = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse environment file: {}", path.display()))?;

        validator::validate(&spec)
            .with_context(|| format!("Invalid environment file: {}", path.display()))?;

        Ok(spec)
    }

    /// Search for the environment file in standard locations
    fn find_env_file(&self) -> Result<PathBuf> {
        // If explicit path provided, use it
        if let Some(path) = &self.env_file {
            let expanded = expand_home(path)?;
            if expanded.exists() {
                return Ok(expanded);
            }
            return Err(anyhow!("Environment file not found: {}", path.display()));
        }

        // Search in standard locations
        let mut search_paths = vec![
            PathBuf::from("./holodeck.yml"),
            PathBuf::from("./holodeck.yaml"),
        ];

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("holodeck").join("env.yml"));
            search_paths.push(config_dir.join("holodeck").join("env.yaml"));
        }

        search_paths.push(PathBuf::from("/etc/holodeck/env.yml"));
        search_paths.push(PathBuf::from("/etc/holodeck/env.yaml"));

        for path in search_paths {
            if path.exists() {
                return Ok(path);
            }
        }

        Err(anyhow!(
            "No environment file found; pass one with --envFile"
        ))
    }
}

/// Expand ~ to home directory
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if let Some(stripped) = path_str.strip_prefix('~') {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
        let rest = stripped.strip_prefix('/').unwrap_or(stripped);
        Ok(home.join(rest))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "name: loaded\ninstance:\n  region: us-west-2\n"
        )
        .unwrap();

        let loader = EnvFileLoader::new(Some(file.path().to_str().unwrap()));
        let spec = loader.load().unwrap();
        assert_eq!(spec.name, "loaded");
    }

    #[test]
    fn test_missing_explicit_file_errors() {
        let loader = EnvFileLoader::new(Some("/nonexistent/holodeck.yaml"));
        assert!(loader.load().is_err());
    }

    #[test]
    fn test_invalid_spec_rejected_on_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "name: bad\ncluster:\n  region: us-west-2\n  controlPlane:\n    count: 2\n"
        )
        .unwrap();

        let loader = EnvFileLoader::new(Some(file.path().to_str().unwrap()));
        let err = loader.load().unwrap_err();
        assert!(format!("{err:#}").contains("odd number"));
    }

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home(Path::new("~/x")).unwrap(), home.join("x"));
        assert_eq!(
            expand_home(Path::new("/abs/x")).unwrap(),
            PathBuf::from("/abs/x")
        );
    }
}
