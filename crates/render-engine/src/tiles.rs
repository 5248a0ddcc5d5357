//! Software map renderer drawing a coloured tile grid.
//!
//! Map states are JSON objects of the form
//! `{"columns": 3, "tiles": ["#aa0000", "#00aa00", ...]}`; tiles fill the
//! canvas row by row. States without that shape draw the background only.

use image::{Rgba, RgbaImage};
use maplapse_common::{MaplapseError, MaplapseResult};
use maplapse_history_model::MapState;
use maplapse_platform_core::MapRenderer;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TileState {
    columns: u32,
    tiles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct TileGrid {
    columns: u32,
    tiles: Vec<Rgba<u8>>,
}

/// Parse `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(text: &str) -> Option<Rgba<u8>> {
    let hex = text.strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255])),
        8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
        _ => None,
    }
}

/// [`MapRenderer`] drawing tile grids into an in-memory canvas.
#[derive(Debug)]
pub struct TileMapRenderer {
    background: Rgba<u8>,
    grid: Option<TileGrid>,
    canvas: RgbaImage,
    redraws: u64,
}

impl TileMapRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        let background = Rgba([24, 28, 36, 255]);
        Self {
            background,
            grid: None,
            canvas: RgbaImage::from_pixel(width, height, background),
            redraws: 0,
        }
    }

    pub fn with_background(mut self, background: Rgba<u8>) -> Self {
        self.background = background;
        self.canvas = RgbaImage::from_pixel(self.canvas.width(), self.canvas.height(), background);
        self
    }

    pub fn redraw_count(&self) -> u64 {
        self.redraws
    }

    fn draw(&mut self) {
        let (width, height) = self.canvas.dimensions();
        for pixel in self.canvas.pixels_mut() {
            *pixel = self.background;
        }
        let Some(grid) = &self.grid else {
            return;
        };
        if grid.columns == 0 || grid.tiles.is_empty() {
            return;
        }
        let columns = grid.columns as u64;
        let rows = (grid.tiles.len() as u64).div_ceil(columns);
        for (i, color) in grid.tiles.iter().enumerate() {
            let col = i as u64 % columns;
            let row = i as u64 / columns;
            let x0 = (col * width as u64 / columns) as u32;
            let x1 = ((col + 1) * width as u64 / columns) as u32;
            let y0 = (row * height as u64 / rows) as u32;
            let y1 = ((row + 1) * height as u64 / rows) as u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    self.canvas.put_pixel(x, y, *color);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MapRenderer for TileMapRenderer {
    fn apply(&mut self, state: &MapState) -> MaplapseResult<()> {
        let parsed = match serde_json::from_value::<TileState>(state.as_value().clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "Map state is not a tile grid; drawing background");
                self.grid = None;
                return Ok(());
            }
        };
        let tiles = parsed
            .tiles
            .iter()
            .map(|t| {
                parse_hex_color(t)
                    .ok_or_else(|| MaplapseError::render(format!("invalid tile colour '{t}'")))
            })
            .collect::<MaplapseResult<Vec<_>>>()?;
        self.grid = Some(TileGrid {
            columns: parsed.columns,
            tiles,
        });
        Ok(())
    }

    async fn redraw(&mut self) -> MaplapseResult<()> {
        self.draw();
        self.redraws += 1;
        Ok(())
    }

    fn snapshot(&self) -> MaplapseResult<RgbaImage> {
        Ok(self.canvas.clone())
    }
}
