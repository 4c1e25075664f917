use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use oci_spec::image::{Descriptor, ImageIndex, ImageManifest, MediaType};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::path::{join_clean, parent};
use super::{ImageInfo, ImageLayers, Layer};

/// Blobs smaller than this are kept in memory during the index pass.
const SMALL_BLOB_LIMIT: u64 = 1_000_000;

/// Annotations that carry an image reference in OCI layouts.
const REF_NAME_ANNOTATIONS: &[&str] = &["io.containerd.image.name", "org.opencontainers.image.ref.name"];

/// Nested OCI indexes are followed at most this deep.
const MAX_INDEX_DEPTH: usize = 4;

// ---- Docker-format archive structs (manifest.json) ----

#[derive(Deserialize)]
struct DockerManifestEntry {
    #[serde(rename = "Config")]
    config: String,
    #[serde(rename = "Layers")]
    layers: Vec<String>,
    #[serde(rename = "RepoTags", default)]
    repo_tags: Option<Vec<String>>,
}

/// Where a file's bytes live inside the outer archive.
#[derive(Clone)]
enum Blob {
    /// Byte range of the archive file (uncompressed outer archives).
    Span { offset: u64, size: u64 },
    /// Copied out of a compressed outer archive.
    Bytes(Arc<[u8]>),
}

/// A layer stored inside an image archive, opened on demand.
pub struct ArchiveLayer {
    digest: String,
    archive: Arc<PathBuf>,
    blob: Blob,
}

impl Layer for ArchiveLayer {
    fn digest(&self) -> &str {
        &self.digest
    }

    fn uncompressed(&self) -> io::Result<Box<dyn Read + '_>> {
        match &self.blob {
            Blob::Span { offset, size } => {
                let mut file = File::open(self.archive.as_path())?;
                file.seek(SeekFrom::Start(*offset))?;
                super::decompress(BufReader::new(file.take(*size)))
            }
            Blob::Bytes(data) => super::decompress(&data[..]),
        }
    }
}

/// Everything learned from one pass over the outer archive.
#[derive(Default)]
struct ArchiveContents {
    blobs: HashMap<String, Blob>,
    small: HashMap<String, Vec<u8>>,
    links: HashMap<String, String>,
}

impl ArchiveContents {
    /// Follow in-archive symlinks (Docker >= 25 links `<id>/layer.tar` to blobs).
    fn resolve<'a>(&'a self, path: &'a str) -> &'a str {
        let mut current = path;
        for _ in 0..8 {
            match self.links.get(current) {
                Some(target) => current = target,
                None => break,
            }
        }
        current
    }

    fn small_blob(&self, path: &str) -> Option<&[u8]> {
        self.small.get(self.resolve(path)).map(Vec::as_slice)
    }

    fn blob(&self, path: &str) -> Option<Blob> {
        self.blobs.get(self.resolve(path)).cloned()
    }
}

#[derive(Debug)]
enum ArchiveFormat {
    Docker,
    Oci,
}

/// Open a `docker save`, `podman save` or OCI-layout tar (optionally gzipped).
///
/// `name` and `tag` win over names recorded in the archive; when both are
/// empty the archive's own reference, then `fallback_name`, is used.
pub fn open_archive(path: &Path, name: &str, tag: &str, fallback_name: &str) -> Result<ImageInfo> {
    let contents = scan_archive(path)?;

    let format = if contents.small.contains_key("manifest.json") {
        ArchiveFormat::Docker
    } else if contents.small.contains_key("index.json") {
        ArchiveFormat::Oci
    } else {
        anyhow::bail!("Unrecognized archive format: no manifest.json or index.json found");
    };
    debug!(?format, archive = %path.display(), "detected archive format");

    let archive = Arc::new(path.to_path_buf());
    let (recorded_ref, digest, layers) = match format {
        ArchiveFormat::Docker => docker_layers(&contents, &archive)?,
        ArchiveFormat::Oci => oci_layers(&contents, &archive)?,
    };

    let (final_name, final_tag) = if !name.is_empty() {
        (name.to_string(), Some(tag.to_string()))
    } else if let Some(reference) = recorded_ref {
        let (n, t) = parse_image_ref(&reference);
        (n, Some(t))
    } else {
        (fallback_name.to_string(), None)
    };

    info!(
        image = %final_name,
        layers = layers.len(),
        "resolved image layers from archive",
    );

    Ok(ImageInfo {
        name: final_name,
        tag: final_tag,
        digest,
        layers: ImageLayers::new(layers),
    })
}

fn is_gzip_file(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let n = file.read(&mut magic)?;
    Ok(n == 2 && magic == [0x1f, 0x8b])
}

fn scan_archive(path: &Path) -> Result<ArchiveContents> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    if is_gzip_file(path)? {
        collect_entries(tar::Archive::new(flate2::read::GzDecoder::new(file)), true)
    } else {
        collect_entries(tar::Archive::new(file), false)
    }
}

fn collect_entries<R: Read>(mut archive: tar::Archive<R>, keep_bytes: bool) -> Result<ArchiveContents> {
    let mut contents = ArchiveContents::default();

    for entry_result in archive.entries().context("Failed to read tar entries")? {
        let mut entry = entry_result.context("Failed to read tar entry")?;
        let entry_path = entry.path()?.to_string_lossy().trim_start_matches("./").to_string();

        match entry.header().entry_type() {
            tar::EntryType::Symlink => {
                if let Some(target) = entry.link_name()? {
                    let resolved = join_clean(parent(&entry_path), &target.to_string_lossy());
                    contents.links.insert(entry_path, resolved);
                }
            }
            tar::EntryType::Link => {
                if let Some(target) = entry.link_name()? {
                    let resolved = join_clean("", &target.to_string_lossy());
                    contents.links.insert(entry_path, resolved);
                }
            }
            tar::EntryType::Regular | tar::EntryType::Continuous => {
                let size = entry.size();
                let offset = entry.raw_file_position();
                let small = size < SMALL_BLOB_LIMIT;

                if keep_bytes || small {
                    // The header size is untrusted; grow past the limit only as data arrives.
                    let mut data = Vec::with_capacity(size.min(SMALL_BLOB_LIMIT) as usize);
                    entry
                        .read_to_end(&mut data)
                        .with_context(|| format!("Failed to read {entry_path}"))?;
                    if small {
                        contents.small.insert(entry_path.clone(), data.clone());
                    }
                    if keep_bytes {
                        contents.blobs.insert(entry_path, Blob::Bytes(data.into()));
                        continue;
                    }
                }
                contents.blobs.insert(entry_path, Blob::Span { offset, size });
            }
            _ => {}
        }
    }

    Ok(contents)
}

// ---- Docker-format parsing ----

type ResolvedLayers = (Option<String>, Option<String>, Vec<Box<dyn Layer>>);

fn docker_layers(contents: &ArchiveContents, archive: &Arc<PathBuf>) -> Result<ResolvedLayers> {
    let manifest: Vec<DockerManifestEntry> = serde_json::from_slice(
        contents
            .small_blob("manifest.json")
            .context("manifest.json not found in archive")?,
    )
    .context("Failed to parse manifest.json")?;

    let me = manifest.into_iter().next().context("Empty manifest in archive")?;

    // The image ID is the sha256 of the config blob.
    let digest = contents
        .small_blob(&me.config)
        .map(|config| format!("sha256:{:x}", Sha256::digest(config)));

    let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(me.layers.len());
    for layer_path in &me.layers {
        let blob = contents
            .blob(layer_path)
            .with_context(|| format!("Layer {layer_path} not found in archive"))?;
        layers.push(Box::new(ArchiveLayer {
            digest: layer_digest(contents.resolve(layer_path)),
            archive: Arc::clone(archive),
            blob,
        }));
    }

    let reference = me.repo_tags.and_then(|tags| tags.into_iter().next());
    Ok((reference, digest, layers))
}

/// `blobs/sha256/<hex>` becomes `sha256:<hex>`; other paths are kept as-is.
fn layer_digest(path: &str) -> String {
    match path.strip_prefix("blobs/").and_then(|rest| rest.split_once('/')) {
        Some((algorithm, hex)) => format!("{algorithm}:{hex}"),
        None => path.to_string(),
    }
}

// ---- OCI-layout parsing ----

fn blob_path(descriptor: &Descriptor) -> String {
    format!("blobs/{}", descriptor.digest().to_string().replacen(':', "/", 1))
}

fn reference_annotation(descriptor: &Descriptor) -> Option<String> {
    let annotations = descriptor.annotations().as_ref()?;
    REF_NAME_ANNOTATIONS
        .iter()
        .find_map(|key| annotations.get(*key))
        // A bare tag ("latest") carries no repository name.
        .filter(|value| value.contains('/') || value.contains(':'))
        .cloned()
}

fn oci_layers(contents: &ArchiveContents, archive: &Arc<PathBuf>) -> Result<ResolvedLayers> {
    let mut index = ImageIndex::from_reader(
        contents
            .small_blob("index.json")
            .context("index.json not found in OCI archive")?,
    )
    .context("Failed to parse index.json")?;

    let mut reference = None;
    let mut depth = 0;

    let manifest_desc = loop {
        let desc = index
            .manifests()
            .first()
            .cloned()
            .context("No manifests in index.json")?;
        if reference.is_none() {
            reference = reference_annotation(&desc);
        }

        if *desc.media_type() != MediaType::ImageIndex {
            break desc;
        }

        depth += 1;
        if depth > MAX_INDEX_DEPTH {
            anyhow::bail!("OCI index nesting deeper than {MAX_INDEX_DEPTH} levels");
        }
        let path = blob_path(&desc);
        index = ImageIndex::from_reader(
            contents
                .small_blob(&path)
                .with_context(|| format!("Index blob {} not found", desc.digest()))?,
        )
        .with_context(|| format!("Failed to parse index {}", desc.digest()))?;
    };

    let manifest = ImageManifest::from_reader(
        contents
            .small_blob(&blob_path(&manifest_desc))
            .with_context(|| format!("Manifest blob {} not found", manifest_desc.digest()))?,
    )
    .context("Failed to parse OCI manifest")?;

    let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(manifest.layers().len());
    for layer_desc in manifest.layers() {
        let path = blob_path(layer_desc);
        let blob = contents
            .blob(&path)
            .with_context(|| format!("Layer blob {} not found", layer_desc.digest()))?;
        layers.push(Box::new(ArchiveLayer {
            digest: layer_desc.digest().to_string(),
            archive: Arc::clone(archive),
            blob,
        }));
    }

    Ok((reference, Some(manifest_desc.digest().to_string()), layers))
}

// ---- Helpers ----

/// Parse `name:tag` handling registry port syntax (`registry:5000/foo:bar`).
pub fn parse_image_ref(image: &str) -> (String, String) {
    let image = image.split_once('@').map(|(n, _)| n).unwrap_or(image);
    if let Some((n, t)) = image.rsplit_once(':') {
        if t.contains('/') {
            (image.to_string(), "latest".to_string())
        } else {
            (n.to_string(), t.to_string())
        }
    } else {
        (image.to_string(), "latest".to_string())
    }
}
