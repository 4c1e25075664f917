use std::collections::BTreeMap;
use std::io::Read;

use tracing::{debug, info};

use super::shadow::{LayerVisibility, is_whiteout};
use crate::config::ScanConfig;
use crate::error::{Result, ScanError};
use crate::inspector::path::{join_clean, normalize_entry_path};
use crate::inspector::{EntryKind, ImageLayers};

/// Shared license texts keyed by their install path.
///
/// Keys iterate in sorted order, so reference detection is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonLicenseIndex {
    texts: BTreeMap<String, String>,
}

impl CommonLicenseIndex {
    pub fn get(&self, path: &str) -> Option<&str> {
        self.texts.get(path).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.texts.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.texts.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// First pass: collect every text under a common license directory.
pub struct IndexBuilder<'a> {
    config: &'a ScanConfig,
    visibility: Option<&'a LayerVisibility>,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(config: &'a ScanConfig) -> Self {
        Self {
            config,
            visibility: None,
        }
    }

    /// Ignore entries shadowed by later layers.
    pub fn with_visibility(mut self, visibility: &'a LayerVisibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    fn prefix_for(&self, path: &str) -> Option<&'a str> {
        self.config
            .common_license_dirs
            .iter()
            .find(|dir| path.starts_with(dir.as_str()))
            .map(String::as_str)
    }

    /// Walk the layers, then resolve links once every direct text is known.
    pub fn build(&self, layers: &ImageLayers) -> Result<CommonLicenseIndex> {
        let mut texts = BTreeMap::new();
        // Links may point at files that appear later in the walk.
        let mut links: Vec<(String, Vec<String>)> = Vec::new();

        layers.walk(|entry| {
            let Some(dir) = self.prefix_for(&entry.path) else {
                return Ok(());
            };
            if is_whiteout(&entry.path) {
                return Ok(());
            }
            if let Some(visibility) = self.visibility {
                if !visibility.is_visible(entry) {
                    return Ok(());
                }
            }

            if entry.kind.is_link() {
                if let Some(target) = entry.link_target.as_deref() {
                    let relative = join_clean(dir, target);
                    let candidates = match entry.kind {
                        // Hard link names are usually relative to the archive root.
                        EntryKind::HardLink => vec![normalize_entry_path(target), relative],
                        _ => vec![relative],
                    };
                    debug!(link = %entry.path, targets = ?candidates, "common license link");
                    links.push((entry.path.clone(), candidates));
                }
                return Ok(());
            }

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|source| ScanError::ContentRead {
                    path: entry.path.clone(),
                    source,
                })?;
            texts.insert(entry.path.clone(), String::from_utf8_lossy(&data).into_owned());
            Ok(())
        })?;

        let direct = texts.len();
        // Only direct texts satisfy a link, never another link.
        let resolved: Vec<(String, String)> = links
            .into_iter()
            .filter_map(|(link, candidates)| {
                match candidates.iter().find_map(|target| texts.get(target)) {
                    Some(text) => Some((link, text.clone())),
                    None => {
                        debug!(%link, targets = ?candidates, "link target not collected, skipping");
                        None
                    }
                }
            })
            .collect();
        texts.extend(resolved);

        info!(direct, total = texts.len(), "collected common licenses");
        Ok(CommonLicenseIndex { texts })
    }
}
