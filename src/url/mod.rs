//! URL normalization and host extraction
//!
//! All cross-worker identity (frontier membership, the seen-filter, document
//! keys) is defined over the normalized form produced here.

mod domain;
mod normalize;

pub use domain::host_of;
pub use normalize::normalize_url;
