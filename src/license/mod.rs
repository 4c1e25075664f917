//! Common license collection and license file reporting.
//!
//! A scan is two strictly ordered passes over the same layers: the
//! [`IndexBuilder`] collects shared license texts, then the [`Reporter`]
//! prints license files and appends the shared texts they point at. The
//! reporter borrows the finished index, so it cannot observe a partial one.

pub mod index;
pub mod report;
pub mod shadow;

pub use index::{CommonLicenseIndex, IndexBuilder};
pub use report::{Reporter, list_common_licenses};
pub use shadow::LayerVisibility;
