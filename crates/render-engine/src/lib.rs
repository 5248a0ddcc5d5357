//! Maplapse Render Engine
//!
//! Produces the raster frames fed to the encoder.
//!
//! # Pipeline Architecture
//!
//! ```text
//! FrameRecord ──▶ MapRenderer::apply ──▶ redraw ──▶ snapshot
//!                                                      │
//!                                         resize to recording surface
//!                                                      │
//!                                              date label overlay
//!                                                      │
//!                                                      ▼
//!                                                  RgbaImage
//! ```

pub mod compositor;
pub mod label;
pub mod tiles;

pub use compositor::*;
pub use label::*;
pub use tiles::*;
