use std::io;

/// Fatal failures of a layer walk, index build or report pass.
///
/// An unresolved common-license link is not an error: the link is simply
/// left out of the index.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("unable to fetch uncompressed layer {layer}: {source}")]
    LayerOpen {
        layer: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to read next file in layer {layer}: {source}")]
    Archive {
        layer: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to read contents of {path}: {source}")]
    ContentRead {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to write report: {0}")]
    Output(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
