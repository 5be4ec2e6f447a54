//! Draws decoded images with half-block cells.
//!
//! Each terminal cell shows two vertically stacked pixels (`▀` with the top
//! pixel as foreground and the bottom pixel as background), so a `cols x rows`
//! area is a `cols x 2*rows` pixel canvas. Zoom scales the fitted image around
//! the canvas centre and pan shifts it in canvas pixels.

use anyhow::{Context, Result};
use image::RgbaImage;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span, Text};

const UPPER_HALF: &str = "▀";

#[derive(Clone)]
pub struct Picture {
    pixels: RgbaImage,
}

impl Picture {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes).context("picture: decode")?;
        Ok(Self {
            pixels: image.to_rgba8(),
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn render(&self, cols: u16, rows: u16, zoom: f64, pan: (f64, f64)) -> Text<'static> {
        let (iw, ih) = self.pixels.dimensions();
        if cols == 0 || rows == 0 || iw == 0 || ih == 0 {
            return Text::default();
        }
        let canvas_w = f64::from(cols);
        let canvas_h = f64::from(rows) * 2.0;
        let fit = (canvas_w / f64::from(iw)).min(canvas_h / f64::from(ih));
        let scale = fit * zoom.max(1.0);
        let origin_x = (canvas_w - f64::from(iw) * scale) / 2.0 + pan.0;
        let origin_y = (canvas_h - f64::from(ih) * scale) / 2.0 + pan.1;

        let sample = |x: u16, y: u32| -> Option<Color> {
            let src_x = ((f64::from(x) + 0.5 - origin_x) / scale).floor();
            let src_y = ((f64::from(y) + 0.5 - origin_y) / scale).floor();
            if src_x < 0.0 || src_y < 0.0 || src_x >= f64::from(iw) || src_y >= f64::from(ih) {
                return None;
            }
            let px = self.pixels.get_pixel(src_x as u32, src_y as u32);
            if px[3] < 128 {
                return None;
            }
            Some(Color::Rgb(px[0], px[1], px[2]))
        };

        let mut lines = Vec::with_capacity(usize::from(rows));
        for row in 0..rows {
            let top_y = u32::from(row) * 2;
            let mut spans = Vec::with_capacity(usize::from(cols));
            for col in 0..cols {
                let top = sample(col, top_y);
                let bottom = sample(col, top_y + 1);
                let span = match (top, bottom) {
                    (None, None) => Span::raw(" "),
                    (top, bottom) => {
                        let mut style = Style::default();
                        if let Some(color) = top {
                            style = style.fg(color);
                        }
                        if let Some(color) = bottom {
                            style = style.bg(color);
                        }
                        if top.is_some() {
                            Span::styled(UPPER_HALF, style)
                        } else {
                            Span::styled(" ", style)
                        }
                    }
                };
                spans.push(span);
            }
            lines.push(Line::from(spans));
        }
        Text::from(lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn painted_cells(text: &Text<'_>) -> usize {
        text.lines
            .iter()
            .flat_map(|line| line.spans.iter())
            .filter(|span| span.content.as_ref() == UPPER_HALF)
            .count()
    }

    #[test]
    fn square_image_fits_centered() {
        let picture = Picture::decode(&png(10, 10, [255, 0, 0, 255])).unwrap();
        let text = picture.render(20, 5, 1.0, (0.0, 0.0));
        assert_eq!(text.lines.len(), 5);
        // 10x10 canvas pixels centered in a 20x10 canvas.
        assert_eq!(painted_cells(&text), 10 * 5);
        assert_eq!(text.lines[0].spans[0].content.as_ref(), " ");
    }

    #[test]
    fn zoom_fills_more_cells_and_pan_moves_image() {
        let picture = Picture::decode(&png(10, 10, [0, 0, 255, 255])).unwrap();
        let base = painted_cells(&picture.render(20, 5, 1.0, (0.0, 0.0)));
        let zoomed = painted_cells(&picture.render(20, 5, 2.0, (0.0, 0.0)));
        assert!(zoomed > base);

        let panned = picture.render(20, 5, 1.0, (100.0, 0.0));
        assert_eq!(painted_cells(&panned), 0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(Picture::decode(b"not an image").is_err());
    }
}
