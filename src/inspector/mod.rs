pub mod archive;
pub mod docker_archive;
pub mod path;
pub mod runtime;

use std::io::{self, BufRead, Read};

use tracing::debug;

use crate::error::{Result, ScanError};

/// Gzip magic bytes (1f 8b).
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Zstandard frame magic (28 b5 2f fd).
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// One filesystem change-set of an image.
pub trait Layer {
    /// Layer digest (e.g. sha256:abc123...), used in messages.
    fn digest(&self) -> &str;

    /// Open the layer as an uncompressed tar stream.
    fn uncompressed(&self) -> io::Result<Box<dyn Read + '_>>;
}

/// Wrap `reader` in the decoder its leading magic bytes call for.
pub fn decompress<'a, R: BufRead + 'a>(mut reader: R) -> io::Result<Box<dyn Read + 'a>> {
    let head = reader.fill_buf()?;
    if head.starts_with(&GZIP_MAGIC) {
        Ok(Box::new(flate2::bufread::GzDecoder::new(reader)))
    } else if head.starts_with(&ZSTD_MAGIC) {
        Ok(Box::new(zstd::Decoder::with_buffer(reader)?))
    } else {
        Ok(Box::new(reader))
    }
}

/// Type tag of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Symlink,
    HardLink,
    Directory,
    Other,
}

impl EntryKind {
    pub fn is_link(self) -> bool {
        matches!(self, EntryKind::Symlink | EntryKind::HardLink)
    }
}

impl From<tar::EntryType> for EntryKind {
    fn from(ty: tar::EntryType) -> Self {
        match ty {
            tar::EntryType::Regular | tar::EntryType::Continuous => EntryKind::File,
            tar::EntryType::Symlink => EntryKind::Symlink,
            tar::EntryType::Link => EntryKind::HardLink,
            tar::EntryType::Directory => EntryKind::Directory,
            _ => EntryKind::Other,
        }
    }
}

/// A non-directory record handed to a walk callback.
///
/// The content can be read once; it is gone when the callback returns.
pub struct LayerEntry<'a> {
    /// Normalized absolute path (`/usr/share/...`).
    pub path: String,
    pub kind: EntryKind,
    /// Raw link target, only set for symlinks and hard links.
    pub link_target: Option<String>,
    /// Position of the owning layer in the image, base layer first.
    pub layer: usize,
    content: &'a mut dyn Read,
}

impl Read for LayerEntry<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.content.read(buf)
    }
}

/// The ordered layers of an image, base layer first.
#[derive(Default)]
pub struct ImageLayers {
    layers: Vec<Box<dyn Layer>>,
}

impl ImageLayers {
    pub fn new(layers: Vec<Box<dyn Layer>>) -> Self {
        Self { layers }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn digests(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.digest())
    }

    /// Visit every non-directory entry of every layer in order.
    ///
    /// The first error, from the archive or from `on_entry`, ends the walk.
    /// Each layer's stream is closed before the next one is opened.
    pub fn walk<F>(&self, mut on_entry: F) -> Result<()>
    where
        F: FnMut(&mut LayerEntry<'_>) -> Result<()>,
    {
        for (index, layer) in self.layers.iter().enumerate() {
            let digest = layer.digest();
            debug!(layer = index, digest, "walking layer");

            let reader = layer.uncompressed().map_err(|source| ScanError::LayerOpen {
                layer: digest.to_string(),
                source,
            })?;
            let archive_err = |source| ScanError::Archive {
                layer: digest.to_string(),
                source,
            };

            let mut archive = tar::Archive::new(reader);
            for entry_result in archive.entries().map_err(archive_err)? {
                let mut entry = entry_result.map_err(archive_err)?;

                let kind = EntryKind::from(entry.header().entry_type());
                // Old archives mark directories with a regular type flag and a trailing slash.
                if kind == EntryKind::Directory || (kind == EntryKind::File && entry.path_bytes().ends_with(b"/")) {
                    continue;
                }

                let path = path::normalize_entry_path(&entry.path().map_err(archive_err)?.to_string_lossy());
                let link_target = if kind.is_link() {
                    entry
                        .link_name()
                        .map_err(archive_err)?
                        .map(|p| p.to_string_lossy().into_owned())
                } else {
                    None
                };

                let mut record = LayerEntry {
                    path,
                    kind,
                    link_target,
                    layer: index,
                    content: &mut entry,
                };
                on_entry(&mut record)?;
            }
        }

        Ok(())
    }
}

/// An image resolved to its layers.
pub struct ImageInfo {
    pub name: String,
    pub tag: Option<String>,
    /// Manifest digest or image ID, when the source knows one.
    pub digest: Option<String>,
    pub layers: ImageLayers,
}

impl ImageInfo {
    /// `name:tag@digest`, dropping the parts that are unknown.
    pub fn identifier(&self) -> String {
        let mut id = self.name.clone();
        if let Some(tag) = self.tag.as_deref().filter(|t| !t.is_empty()) {
            id.push(':');
            id.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            id.push('@');
            id.push_str(digest);
        }
        id
    }
}

/// Common interface for turning an image argument into layers.
pub trait Inspector {
    fn inspect(&mut self, image: &str) -> anyhow::Result<ImageInfo>;
}
