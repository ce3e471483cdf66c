//! PNG candlestick charts for alert messages.

use crate::bars::Series;
use crate::error::RenderError;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

pub mod colors {
    use image::Rgb;

    pub const GREEN: Rgb<u8> = Rgb([0, 200, 83]);
    pub const RED: Rgb<u8> = Rgb([255, 68, 68]);
    pub const DARK_GRAY: Rgb<u8> = Rgb([17, 17, 17]);
    pub const GRID: Rgb<u8> = Rgb([40, 40, 40]);
    pub const ORANGE: Rgb<u8> = Rgb([255, 152, 0]);
}

/// Turns a series into an image attached to the alert.
pub trait ChartRenderer {
    fn render(&self, series: &Series) -> Result<Vec<u8>, RenderError>;
}

#[derive(Debug, Clone)]
pub struct ChartConfig {
    pub width: u32,
    pub height: u32,
    pub margin: u32,
    pub background: Rgb<u8>,
    pub bullish_color: Rgb<u8>,
    pub bearish_color: Rgb<u8>,
    /// Marks the bar the alert is about.
    pub highlight_color: Rgb<u8>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            margin: 40,
            background: colors::DARK_GRAY,
            bullish_color: colors::GREEN,
            bearish_color: colors::RED,
            highlight_color: colors::ORANGE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CandlestickRenderer {
    config: ChartConfig,
}

impl CandlestickRenderer {
    pub fn new(config: ChartConfig) -> Self {
        Self { config }
    }

    pub fn draw(&self, series: &Series) -> Result<RgbImage, RenderError> {
        if series.is_empty() {
            return Err(RenderError::EmptySeries);
        }
        let bars = series.bars();

        let ChartConfig {
            width,
            height,
            margin,
            ..
        } = self.config;
        let mut img = RgbImage::from_pixel(width, height, self.config.background);

        let max = bars.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let min = bars.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let range = if max > min { max - min } else { 1.0 };

        let plot_w = width.saturating_sub(2 * margin).max(1);
        let plot_h = height.saturating_sub(2 * margin).max(1);
        let to_y = |price: f64| -> u32 {
            let ratio = ((max - price) / range).clamp(0.0, 1.0);
            margin + (ratio * f64::from(plot_h - 1)).round() as u32
        };

        for step in 0..=4 {
            let y = margin + plot_h.saturating_sub(1) * step / 4;
            draw_horizontal_line(&mut img, y, margin, margin + plot_w - 1, colors::GRID);
        }

        let slot = f64::from(plot_w) / bars.len() as f64;
        let body_w = ((slot * 0.7) as u32).max(1);
        let highlighted = bars.len().checked_sub(2);

        for (i, bar) in bars.iter().enumerate() {
            let center = margin + (slot * (i as f64 + 0.5)) as u32;
            let color = if bar.close >= bar.open {
                self.config.bullish_color
            } else {
                self.config.bearish_color
            };

            draw_vertical_line(&mut img, center, to_y(bar.high), to_y(bar.low), color);

            let top = to_y(bar.open.max(bar.close));
            let bottom = to_y(bar.open.min(bar.close));
            let left = center.saturating_sub(body_w / 2);
            draw_filled_rect(&mut img, left, top, body_w, bottom - top + 1, color);

            if highlighted == Some(i) {
                let marker_y = (to_y(bar.low) + 6).min(height - 1);
                draw_filled_rect(&mut img, left, marker_y, body_w, 4, self.config.highlight_color);
            }
        }

        Ok(img)
    }
}

impl ChartRenderer for CandlestickRenderer {
    fn render(&self, series: &Series) -> Result<Vec<u8>, RenderError> {
        let img = self.draw(series)?;
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}

fn draw_filled_rect(img: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    let x_end = x.saturating_add(width).min(img.width());
    let y_end = y.saturating_add(height).min(img.height());
    for py in y..y_end {
        for px in x..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

fn draw_vertical_line(img: &mut RgbImage, x: u32, y1: u32, y2: u32, color: Rgb<u8>) {
    if x >= img.width() {
        return;
    }
    let (start, end) = (y1.min(y2), y1.max(y2).min(img.height() - 1));
    for y in start..=end {
        img.put_pixel(x, y, color);
    }
}

fn draw_horizontal_line(img: &mut RgbImage, y: u32, x1: u32, x2: u32, color: Rgb<u8>) {
    if y >= img.height() {
        return;
    }
    let (start, end) = (x1.min(x2), x1.max(x2).min(img.width() - 1));
    for x in start..=end {
        img.put_pixel(x, y, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bars::{NormalizeSettings, local_offset, normalize};
    use crate::config::Interval;
    use crate::signer::KlineRequest;
    use serde_json::json;

    fn series(rows: usize) -> Result<Series, crate::error::SeriesError> {
        let data: Vec<_> = (0..rows as i64)
            .map(|i| {
                let t = 1_700_000_000_000 + i * 900_000;
                let open = 100.0 + i as f64;
                json!([t, open, open + 3.0, open - 2.0, open + if i % 2 == 0 { 1.0 } else { -1.0 }, 0, t + 899_999, 1_000_000])
            })
            .collect();
        let body = json!({"code": 0, "data": data}).to_string();
        let request = KlineRequest {
            symbol: "BTC-USDT".to_string(),
            interval: Interval::M15,
            start_time: 0,
        };
        let settings = NormalizeSettings {
            window: 100,
            volume_divisor: 1_000_000.0,
            utc_offset: local_offset(),
        };
        normalize(&body, &request, &settings)
    }

    fn small_renderer() -> CandlestickRenderer {
        CandlestickRenderer::new(ChartConfig {
            width: 200,
            height: 120,
            margin: 10,
            ..Default::default()
        })
    }

    #[test]
    fn renders_png_bytes() {
        let png = small_renderer().render(&series(20).unwrap()).unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn candles_are_drawn_in_both_colors() {
        let img = small_renderer().draw(&series(20).unwrap()).unwrap();
        assert!(img.pixels().any(|p| *p == colors::GREEN));
        assert!(img.pixels().any(|p| *p == colors::RED));
        assert!(img.pixels().any(|p| *p == colors::ORANGE));
    }

    #[test]
    fn flat_series_still_renders() {
        let body = json!({"code": 0, "data": [
            [1_700_000_000_000_i64, 1.0, 1.0, 1.0, 1.0, 0, 1_700_000_899_999_i64, 0],
            [1_700_000_900_000_i64, 1.0, 1.0, 1.0, 1.0, 0, 1_700_001_799_999_i64, 0],
            [1_700_001_800_000_i64, 1.0, 1.0, 1.0, 1.0, 0, 1_700_002_699_999_i64, 0]
        ]})
        .to_string();
        let request = KlineRequest {
            symbol: "FLAT-USDT".to_string(),
            interval: Interval::M15,
            start_time: 0,
        };
        let settings = NormalizeSettings {
            window: 10,
            volume_divisor: 1.0,
            utc_offset: local_offset(),
        };
        let flat = normalize(&body, &request, &settings).unwrap();
        assert!(small_renderer().render(&flat).is_ok());
    }
}
