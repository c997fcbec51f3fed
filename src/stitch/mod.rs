//! ROI stitching and compositing.
//!
//! Turns the stitchable acquisitions of one container into a single shared
//! multi-channel canvas:
//!
//! - [`collector`] extracts [`RoiEntry`] values (boundary polygon, pixel
//!   geometry, channel labels, timestamp, lazy pixel source) from the
//!   metadata graph.
//! - [`polygon`] rasterizes boundary polygons into footprint masks.
//! - [`resample`] brings ROI planes to the canvas pixel size.
//! - [`canvas`] sizes the canvas, orders the ROIs, and composites them.

pub mod canvas;
pub mod collector;
pub mod polygon;
pub mod resample;

pub use canvas::{composite, Canvas, StitchOptions, StitchReport};
pub use collector::{collect_rois, ContainerPixelSource, PixelSource, RoiEntry};
pub use polygon::rasterize_polygon;
pub use resample::{needs_resample, resample_grid, resample_plane, PIXEL_SIZE_TOLERANCE};
