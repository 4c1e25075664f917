//! Layer fixtures shared by unit tests.

use std::io::{self, Read, Write};

use crate::inspector::{self, ImageLayers, Layer};

/// One record of a fixture layer.
#[derive(Clone, Copy)]
pub enum Fixture<'a> {
    File(&'a str, &'a str),
    Symlink(&'a str, &'a str),
    HardLink(&'a str, &'a str),
    Dir(&'a str),
    /// Pre-POSIX directory: regular type flag, name ending in `/`.
    OldDir(&'a str),
}

/// Build an uncompressed tar stream holding `entries`.
pub fn tar_bytes(entries: &[Fixture<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for fixture in entries {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        match *fixture {
            Fixture::File(path, text) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(text.len() as u64);
                builder.append_data(&mut header, path, text.as_bytes()).unwrap();
            }
            Fixture::Symlink(path, target) | Fixture::HardLink(path, target) => {
                let ty = if matches!(fixture, Fixture::Symlink(..)) {
                    tar::EntryType::Symlink
                } else {
                    tar::EntryType::Link
                };
                header.set_entry_type(ty);
                header.set_size(0);
                builder.append_link(&mut header, path, target).unwrap();
            }
            Fixture::Dir(path) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, path, io::empty()).unwrap();
            }
            Fixture::OldDir(path) => {
                let mut header = tar::Header::new_old();
                header.as_old_mut().name[..path.len()].copy_from_slice(path.as_bytes());
                header.set_entry_type(tar::EntryType::new(0));
                header.set_mode(0o755);
                header.set_size(0);
                header.set_cksum();
                builder.append(&header, io::empty()).unwrap();
            }
        }
    }
    builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A layer held in memory, compressed or not.
pub struct MemoryLayer {
    digest: String,
    data: Vec<u8>,
}

impl MemoryLayer {
    pub fn raw(digest: &str, data: Vec<u8>) -> Self {
        Self {
            digest: digest.to_string(),
            data,
        }
    }

    pub fn plain(digest: &str, entries: &[Fixture<'_>]) -> Self {
        Self::raw(digest, tar_bytes(entries))
    }

    pub fn gzip(digest: &str, entries: &[Fixture<'_>]) -> Self {
        Self::raw(digest, gzip(&tar_bytes(entries)))
    }

    pub fn zstd(digest: &str, entries: &[Fixture<'_>]) -> Self {
        Self::raw(digest, zstd::encode_all(&tar_bytes(entries)[..], 0).unwrap())
    }
}

impl Layer for MemoryLayer {
    fn digest(&self) -> &str {
        &self.digest
    }

    fn uncompressed(&self) -> io::Result<Box<dyn Read + '_>> {
        inspector::decompress(&self.data[..])
    }
}

/// Gzip-compressed layers named `layer0`, `layer1`, ...
pub fn layers(contents: Vec<Vec<Fixture<'_>>>) -> ImageLayers {
    ImageLayers::new(
        contents
            .iter()
            .enumerate()
            .map(|(i, entries)| {
                Box::new(MemoryLayer::gzip(&format!("layer{i}"), entries)) as Box<dyn Layer>
            })
            .collect(),
    )
}
