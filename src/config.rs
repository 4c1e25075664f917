use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Filenames (matched as path suffixes) that mark a file as a license.
pub const DEFAULT_LICENSE_FILENAMES: &[&str] = &[
    "LICENSE",
    "LICENSE.code",
    "LICENSE.md",
    "LICENSE.txt",
    "COPYING",
    "copyright",
];

/// Where Debian-based images install shared license texts.
pub const DEFAULT_COMMON_LICENSE_DIRS: &[&str] = &["/usr/share/common-licenses/"];

/// Naming tables and switches for a single scan.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Directory prefixes holding shared license texts. First match wins.
    pub common_license_dirs: Vec<String>,

    /// Path suffixes recognized as license files.
    pub license_filenames: Vec<String>,

    /// Only consider the copy of a path that is visible in the final image.
    pub resolve_shadowing: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            common_license_dirs: DEFAULT_COMMON_LICENSE_DIRS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            license_filenames: DEFAULT_LICENSE_FILENAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            resolve_shadowing: false,
        }
    }
}

/// Values given on the command line. `None`/empty means "keep the file or default value".
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub config_file: Option<String>,
    pub common_license_dirs: Vec<String>,
    pub license_filenames: Vec<String>,
    pub resolve_shadowing: bool,
}

impl ScanConfig {
    /// Read a JSON config file. Missing keys fall back to the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: ScanConfig = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON config {}", path.display()))?;
        config.validated()
    }

    /// Layer the CLI on top of the optional config file and the defaults.
    pub fn from_cli(cli: CliOverrides) -> Result<Self> {
        let mut config = match &cli.config_file {
            Some(path) => Self::load(Path::new(path))?,
            None => Self::default(),
        };

        if !cli.common_license_dirs.is_empty() {
            config.common_license_dirs = cli.common_license_dirs;
        }
        if !cli.license_filenames.is_empty() {
            config.license_filenames = cli.license_filenames;
        }
        if cli.resolve_shadowing {
            config.resolve_shadowing = true;
        }

        config.validated()
    }

    /// Check the lists and normalize every directory to `/dir/`.
    pub fn validated(mut self) -> Result<Self> {
        if self.common_license_dirs.is_empty() {
            bail!("At least one common license directory is required");
        }
        if self.license_filenames.iter().all(|n| n.is_empty()) {
            bail!("At least one license filename is required");
        }
        self.license_filenames.retain(|n| !n.is_empty());

        for dir in &mut self.common_license_dirs {
            let trimmed = dir.trim_start_matches('.').trim_matches('/');
            if trimmed.is_empty() {
                bail!("Common license directory {dir:?} would match every file");
            }
            *dir = format!("/{trimmed}/");
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_debian_layout() {
        let config = ScanConfig::default();
        assert_eq!(config.common_license_dirs, vec!["/usr/share/common-licenses/"]);
        assert!(config.license_filenames.iter().any(|n| n == "copyright"));
        assert!(!config.resolve_shadowing);
    }

    #[test]
    fn directories_are_normalized() {
        let config = ScanConfig {
            common_license_dirs: vec![
                "usr/share/licenses".to_string(),
                "./opt/licenses/".to_string(),
                "/srv/legal".to_string(),
            ],
            ..ScanConfig::default()
        }
        .validated()
        .unwrap();

        assert_eq!(
            config.common_license_dirs,
            vec!["/usr/share/licenses/", "/opt/licenses/", "/srv/legal/"]
        );
    }

    #[test]
    fn root_directory_is_rejected() {
        let err = ScanConfig {
            common_license_dirs: vec!["/".to_string()],
            ..ScanConfig::default()
        }
        .validated()
        .unwrap_err();
        assert!(err.to_string().contains("every file"), "{err}");
    }

    #[test]
    fn empty_lists_are_rejected() {
        let no_dirs = ScanConfig {
            common_license_dirs: Vec::new(),
            ..ScanConfig::default()
        };
        assert!(no_dirs.validated().is_err());

        let no_names = ScanConfig {
            license_filenames: vec![String::new()],
            ..ScanConfig::default()
        };
        assert!(no_names.validated().is_err());
    }

    #[test]
    fn load_fills_missing_keys_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        fs::write(&path, r#"{ "license_filenames": ["NOTICE"] }"#).unwrap();

        let config = ScanConfig::load(&path).unwrap();
        assert_eq!(config.license_filenames, vec!["NOTICE"]);
        assert_eq!(config.common_license_dirs, vec!["/usr/share/common-licenses/"]);
    }

    #[test]
    fn load_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        fs::write(&path, r#"{ "license_names": ["NOTICE"] }"#).unwrap();

        assert!(ScanConfig::load(&path).is_err());
    }

    #[test]
    fn cli_replaces_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        fs::write(
            &path,
            r#"{ "common_license_dirs": ["/usr/share/licenses"], "license_filenames": ["NOTICE"] }"#,
        )
        .unwrap();

        let config = ScanConfig::from_cli(CliOverrides {
            config_file: Some(path.display().to_string()),
            common_license_dirs: Vec::new(),
            license_filenames: vec!["COPYING".to_string()],
            resolve_shadowing: true,
        })
        .unwrap();

        assert_eq!(config.common_license_dirs, vec!["/usr/share/licenses/"]);
        assert_eq!(config.license_filenames, vec!["COPYING"]);
        assert!(config.resolve_shadowing);
    }
}
