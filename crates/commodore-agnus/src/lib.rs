//! Commodore Agnus — beam position, DMA slot arbitration, and the two
//! embedded coprocessors (Copper and Blitter).
//!
//! Agnus owns the raster beam and decides, for every colour clock of a
//! rasterline, which DMA channel may access chip memory. The decisions for
//! a whole line are precomputed into a fetch table that is rebuilt whenever
//! a display-window or bitplane-control register changes.

pub mod agnus;
pub mod beam;
pub mod blitter;
pub mod copper;

pub use agnus::{Agnus, AgnusInfo, FetchAction};
pub use beam::{Beam, VideoStandard};
pub use blitter::{Blitter, BlitterBus};
pub use copper::Copper;

/// Colour clocks per PAL/NTSC rasterline.
pub const CCKS_PER_LINE: u16 = 227;
