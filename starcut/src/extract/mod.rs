//! Pixel extraction from mosaic and stamp products.
//!
//! Two extraction paths share one artifact envelope:
//!
//! - [`extract_window`] slices a rectangular pixel window around a sky
//!   position from a continuous mosaic image, honouring an [`EdgeMode`]
//!   for windows that spill over the image bounds.
//! - [`extract_nearest_stamp`] serves point-spread-function products,
//!   which store a grid of fixed-size stamps at discrete catalog
//!   positions rather than a continuous image.
//!
//! Both return a [`CutoutArtifact`] (pixel payload, transform fragment,
//! provenance, eagerly computed invalid-value flag) so the cache and the
//! batch layer need no extraction-type-specific branching.

mod artifact;
mod error;
mod stamp;
mod wcs;
mod window;

pub use artifact::{CutoutArtifact, StampProvenance, WindowSize};
pub use error::ExtractError;
pub use stamp::extract_nearest_stamp;
pub use wcs::Wcs;
pub use window::{extract_window, EdgeMode, DEFAULT_FILL_VALUE};
