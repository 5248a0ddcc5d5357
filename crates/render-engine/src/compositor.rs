//! Frame compositor: renderer snapshot plus date label.
//!
//! For each frame record the compositor pushes the record's state into the
//! caller's renderer, waits for a redraw, copies the drawn surface onto the
//! recording surface, and paints the date label. The renderer is left showing
//! the last composited state; restoring it is up to the caller.

use std::sync::Arc;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use maplapse_common::{MaplapseError, MaplapseResult};
use maplapse_history_model::FrameRecord;
use maplapse_platform_core::MapRenderer;

use crate::label::{label_scale, LabelFont, LabelPainter, LabelStyle};

/// Recording and reference resolution for a compositor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
    pub reference_width: u32,
    pub reference_height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            reference_width: 1920,
            reference_height: 1080,
        }
    }

    pub fn with_reference(mut self, width: u32, height: u32) -> Self {
        self.reference_width = width;
        self.reference_height = height;
        self
    }

    pub fn label_scale(&self) -> f32 {
        label_scale(
            self.width,
            self.height,
            self.reference_width,
            self.reference_height,
        )
    }
}

/// Turns frame records into labelled raster frames.
pub struct FrameCompositor {
    surface: RgbaImage,
    label: LabelPainter,
    frames: u64,
}

impl FrameCompositor {
    /// `style` is given at the reference resolution and scaled here.
    pub fn new(size: SurfaceSize, style: LabelStyle, font: Option<Arc<dyn LabelFont>>) -> Self {
        let scale = size.label_scale();
        tracing::debug!(
            width = size.width,
            height = size.height,
            scale,
            "Allocated recording surface"
        );
        Self {
            surface: RgbaImage::from_pixel(size.width, size.height, Rgba([0, 0, 0, 255])),
            label: LabelPainter::new(font, style.scaled(scale)),
            frames: 0,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }

    /// The most recently composited frame.
    pub fn last_frame(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn frames_composited(&self) -> u64 {
        self.frames
    }

    /// Render `record` and return the labelled frame.
    pub async fn composite(
        &mut self,
        renderer: &mut dyn MapRenderer,
        record: &FrameRecord,
    ) -> MaplapseResult<&RgbaImage> {
        renderer.apply(&record.state)?;
        renderer.redraw().await?;
        let snapshot = renderer.snapshot()?;
        if snapshot.width() == 0 || snapshot.height() == 0 {
            return Err(MaplapseError::render("renderer produced an empty surface"));
        }

        let (width, height) = self.surface.dimensions();
        self.surface = if snapshot.dimensions() == (width, height) {
            snapshot
        } else {
            imageops::resize(&snapshot, width, height, FilterType::Triangle)
        };
        self.label.draw(&mut self.surface, &record.date.text);
        self.frames += 1;
        tracing::trace!(days = record.date.days, frame = self.frames, "Frame composited");
        Ok(&self.surface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::test_fonts::BlockFont;
    use crate::tiles::TileMapRenderer;
    use maplapse_history_model::{MapDate, MapState};
    use serde_json::json;

    fn record(days: i32, color: &str) -> FrameRecord {
        FrameRecord::new(
            MapDate::new(days, format!("Day {days}")),
            MapState::new(json!({"columns": 1, "tiles": [color]})),
        )
    }

    #[tokio::test]
    async fn test_composite_without_font_copies_snapshot() {
        let mut renderer = TileMapRenderer::new(64, 48);
        let mut compositor =
            FrameCompositor::new(SurfaceSize::new(64, 48), LabelStyle::default(), None);
        let frame = compositor
            .composite(&mut renderer, &record(0, "#336699"))
            .await
            .unwrap();
        assert!(frame.pixels().all(|p| *p == Rgba([0x33, 0x66, 0x99, 255])));
        assert_eq!(compositor.frames_composited(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_resized_to_surface() {
        let mut renderer = TileMapRenderer::new(32, 24);
        let mut compositor =
            FrameCompositor::new(SurfaceSize::new(64, 48), LabelStyle::default(), None);
        let frame = compositor
            .composite(&mut renderer, &record(0, "#ff0000"))
            .await
            .unwrap();
        assert_eq!(frame.dimensions(), (64, 48));
        assert_eq!(*frame.get_pixel(32, 24), Rgba([255, 0, 0, 255]));
    }

    #[tokio::test]
    async fn test_last_frame_tracks_latest_record() {
        let mut renderer = TileMapRenderer::new(8, 8);
        let mut compositor =
            FrameCompositor::new(SurfaceSize::new(8, 8), LabelStyle::default(), None);
        for (days, color) in [(0, "#ff0000"), (1, "#00ff00")] {
            compositor
                .composite(&mut renderer, &record(days, color))
                .await
                .unwrap();
        }
        assert_eq!(
            *compositor.last_frame().get_pixel(0, 0),
            Rgba([0, 255, 0, 255])
        );
    }

    #[tokio::test]
    async fn test_label_is_painted_over_snapshot() {
        let style = LabelStyle {
            font_px: 10.0,
            padding_px: 2.0,
            margin_px: 4.0,
            text_color: Rgba([255, 0, 0, 255]),
            background: Rgba([0, 0, 255, 255]),
        };
        let mut renderer = TileMapRenderer::new(200, 100);
        let mut compositor = FrameCompositor::new(
            SurfaceSize::new(200, 100).with_reference(200, 100),
            style,
            Some(Arc::new(BlockFont)),
        );
        let frame = compositor
            .composite(&mut renderer, &record(0, "#00ff00"))
            .await
            .unwrap();

        // "Day 0" is 25x10; box 29x14 at (4, 82), text at (6, 84).
        assert_eq!(*frame.get_pixel(6, 84), Rgba([255, 0, 0, 255]));
        assert_eq!(*frame.get_pixel(30, 93), Rgba([255, 0, 0, 255]));
        assert_eq!(*frame.get_pixel(4, 82), Rgba([0, 0, 255, 255]));
        assert_eq!(*frame.get_pixel(32, 95), Rgba([0, 0, 255, 255]));
        assert_eq!(*frame.get_pixel(3, 82), Rgba([0, 255, 0, 255]));
        assert_eq!(*frame.get_pixel(33, 95), Rgba([0, 255, 0, 255]));
        assert_eq!(*frame.get_pixel(150, 20), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn test_surface_label_scale() {
        let size = SurfaceSize::new(1280, 720).with_reference(1920, 1080);
        assert!((size.label_scale() - 2.0 / 3.0).abs() < 1e-6);
    }
}
