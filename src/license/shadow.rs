use std::collections::BTreeMap;

use tracing::debug;

use crate::error::Result;
use crate::inspector::path::{file_name, parent};
use crate::inspector::{ImageLayers, LayerEntry};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Returns `true` for any whiteout marker, opaque or not.
pub fn is_whiteout(path: &str) -> bool {
    file_name(path).starts_with(WHITEOUT_PREFIX)
}

/// Which layer holds the copy of each path that survives in the final image.
///
/// Later layers shadow earlier ones; `.wh.<name>` deletes `<name>` from lower
/// layers and `.wh..wh..opq` empties its directory for lower layers.
#[derive(Debug, Default)]
pub struct LayerVisibility {
    owners: BTreeMap<String, usize>,
}

impl LayerVisibility {
    /// Walk every layer once and record the last writer of each path.
    pub fn build(layers: &ImageLayers) -> Result<Self> {
        let mut visibility = Self::default();
        layers.walk(|entry| {
            visibility.record(&entry.path, entry.layer);
            Ok(())
        })?;
        debug!(paths = visibility.owners.len(), "resolved layer shadowing");
        Ok(visibility)
    }

    fn record(&mut self, path: &str, layer: usize) {
        let name = file_name(path);
        if name == OPAQUE_WHITEOUT {
            self.remove_below(&format!("{}/", parent(path)), layer);
        } else if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
            let target = format!("{}/{hidden}", parent(path));
            self.remove_below(&format!("{target}/"), layer);
            if self.owners.get(&target).is_some_and(|&owner| owner < layer) {
                self.owners.remove(&target);
            }
        } else {
            self.owners.insert(path.to_string(), layer);
        }
    }

    /// Drop paths under `prefix` written by layers below `layer`.
    fn remove_below(&mut self, prefix: &str, layer: usize) {
        let doomed: Vec<String> = self
            .owners
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .filter(|&(_, &owner)| owner < layer)
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            self.owners.remove(&path);
        }
    }

    /// Whether `entry` is the copy of its path present in the final image.
    pub fn is_visible(&self, entry: &LayerEntry<'_>) -> bool {
        self.owners.get(&entry.path) == Some(&entry.layer)
    }

    #[cfg(test)]
    fn owner(&self, path: &str) -> Option<usize> {
        self.owners.get(path).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{self, Fixture};

    #[test]
    fn later_layer_wins() {
        let layers = testutil::layers(vec![
            vec![Fixture::File("app/LICENSE", "old"), Fixture::File("etc/os-release", "x")],
            vec![Fixture::File("app/LICENSE", "new")],
        ]);
        let visibility = LayerVisibility::build(&layers).unwrap();

        assert_eq!(visibility.owner("/app/LICENSE"), Some(1));
        assert_eq!(visibility.owner("/etc/os-release"), Some(0));
    }

    #[test]
    fn whiteout_hides_file_and_directory() {
        let layers = testutil::layers(vec![
            vec![
                Fixture::File("app/LICENSE", "a"),
                Fixture::File("opt/vendor/COPYING", "b"),
                Fixture::File("opt/vendor/sub/LICENSE", "c"),
                Fixture::File("opt/vendorized/LICENSE", "d"),
            ],
            vec![Fixture::File("app/.wh.LICENSE", ""), Fixture::File("opt/.wh.vendor", "")],
        ]);
        let visibility = LayerVisibility::build(&layers).unwrap();

        assert_eq!(visibility.owner("/app/LICENSE"), None);
        assert_eq!(visibility.owner("/opt/vendor/COPYING"), None);
        assert_eq!(visibility.owner("/opt/vendor/sub/LICENSE"), None);
        assert_eq!(visibility.owner("/opt/vendorized/LICENSE"), Some(0));
    }

    #[test]
    fn opaque_whiteout_only_clears_lower_layers() {
        let layers = testutil::layers(vec![
            vec![Fixture::File("srv/a/LICENSE", "lower")],
            vec![
                Fixture::File("srv/a/COPYING", "same layer"),
                Fixture::File("srv/a/.wh..wh..opq", ""),
            ],
        ]);
        let visibility = LayerVisibility::build(&layers).unwrap();

        assert_eq!(visibility.owner("/srv/a/LICENSE"), None);
        assert_eq!(visibility.owner("/srv/a/COPYING"), Some(1));
    }

    #[test]
    fn file_restored_after_whiteout() {
        let layers = testutil::layers(vec![
            vec![Fixture::File("app/LICENSE", "v1")],
            vec![Fixture::File("app/.wh.LICENSE", "")],
            vec![Fixture::File("app/LICENSE", "v3")],
        ]);
        let visibility = LayerVisibility::build(&layers).unwrap();
        assert_eq!(visibility.owner("/app/LICENSE"), Some(2));
    }

    #[test]
    fn whiteout_detection() {
        assert!(is_whiteout("/app/.wh.LICENSE"));
        assert!(is_whiteout("/app/.wh..wh..opq"));
        assert!(!is_whiteout("/app/LICENSE"));
        assert!(!is_whiteout("/app/.whatever"));
    }
}
