//! Force plot rendering.
//!
//! Attributions are drawn as arrow-shaped segments along a single value
//! axis. Features that push the output up are stacked to the left of
//! `f(x)` and point right; features that push it down are stacked to the
//! right and point left.

use crate::config::PlotConfig;
use crate::error::PredictionError;
use crate::services::explainer::Explanation;
use anyhow::{anyhow, bail, Context};
use image::{DynamicImage, ImageOutputFormat, RgbImage};
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters::style::{
    register_font,
    text_anchor::{HPos, Pos, VPos},
    FontStyle,
};
use std::cmp::Ordering;
use std::io::Cursor;
use std::sync::OnceLock;

pub const MIN_WIDTH: u32 = 320;
pub const MIN_HEIGHT: u32 = 160;

const FONT_FAMILY: &str = "sans-serif";
const FONT: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");

const MARGIN: i32 = 40;
const LEGEND_Y: i32 = 8;
const TOP_MARGIN: i32 = 36;
const AXIS_AREA: i32 = 28;

// Vertical layout in chart units, 0 at the axis and 1 at the top.
const BAND_LO: f64 = 0.35;
const BAND_HI: f64 = 0.65;
const LABEL_Y: f64 = 0.30;
const OUTPUT_Y: f64 = 0.72;
const BASE_Y: f64 = 0.12;

const TEXT: RGBColor = RGBColor(51, 51, 51);
const AXIS: RGBColor = RGBColor(140, 140, 140);

static FONT_REGISTERED: OnceLock<Result<(), String>> = OnceLock::new();

/// One attribution's extent on the value axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Index into `Explanation::attributions`.
    pub index: usize,
    pub start: f64,
    pub end: f64,
    pub increases: bool,
}

/// Stack attributions around the output value.
///
/// Within each side segments are ordered by descending magnitude, ties by
/// feature order, so the largest effects sit next to `f(x)`. Zero
/// attributions are omitted.
pub fn layout(explanation: &Explanation) -> Vec<Segment> {
    let fx = explanation.output_value();

    let by_magnitude = |a: &(usize, f64), b: &(usize, f64)| {
        b.1.abs()
            .partial_cmp(&a.1.abs())
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    };

    let contributions = explanation
        .attributions
        .iter()
        .map(|a| a.contribution)
        .enumerate();
    let mut positive: Vec<(usize, f64)> =
        contributions.clone().filter(|(_, c)| *c > 0.0).collect();
    let mut negative: Vec<(usize, f64)> = contributions.filter(|(_, c)| *c < 0.0).collect();
    positive.sort_by(by_magnitude);
    negative.sort_by(by_magnitude);

    let mut segments = Vec::with_capacity(positive.len() + negative.len());

    let mut cursor = fx;
    for (index, c) in positive {
        segments.push(Segment {
            index,
            start: cursor - c,
            end: cursor,
            increases: true,
        });
        cursor -= c;
    }

    cursor = fx;
    for (index, c) in negative {
        segments.push(Segment {
            index,
            start: cursor,
            end: cursor - c,
            increases: false,
        });
        cursor -= c;
    }

    segments
}

#[derive(Debug, Clone)]
pub struct ForcePlotRenderer {
    width: u32,
    height: u32,
    increase: RGBColor,
    decrease: RGBColor,
}

impl ForcePlotRenderer {
    pub fn new(config: &PlotConfig) -> anyhow::Result<Self> {
        register_plot_font()?;
        Ok(Self {
            width: config.width,
            height: config.height,
            increase: parse_hex_color(&config.increase_color)
                .context("invalid increase color")?,
            decrease: parse_hex_color(&config.decrease_color)
                .context("invalid decrease color")?,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Render `explanation` into a freshly allocated buffer and return the
    /// PNG bytes.
    pub fn render(&self, explanation: &Explanation) -> Result<Vec<u8>, PredictionError> {
        if self.width < MIN_WIDTH || self.height < MIN_HEIGHT {
            return Err(PredictionError::Render(format!(
                "plot size {}x{} is below the {}x{} minimum",
                self.width, self.height, MIN_WIDTH, MIN_HEIGHT
            )));
        }

        let finite = explanation.base_value.is_finite()
            && explanation
                .attributions
                .iter()
                .all(|a| a.contribution.is_finite() && a.value.is_finite());
        if !finite {
            return Err(PredictionError::Render(
                "explanation contains non-finite values".to_string(),
            ));
        }
        if !explanation.output_value().is_finite() {
            return Err(PredictionError::Render("output value overflowed".to_string()));
        }

        let mut buffer = vec![0u8; self.width as usize * self.height as usize * 3];
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (self.width, self.height))
                .into_drawing_area();
            self.draw(&root, explanation)
                .and_then(|_| root.present())
                .map_err(|e| PredictionError::Render(format!("drawing failed: {}", e)))?;
        }

        let img = RgbImage::from_raw(self.width, self.height, buffer).ok_or_else(|| {
            PredictionError::Render("plot buffer does not match its dimensions".to_string())
        })?;
        encode_png(img)
    }

    fn draw<DB: DrawingBackend>(
        &self,
        root: &DrawingArea<DB, Shift>,
        explanation: &Explanation,
    ) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
        root.fill(&WHITE)?;
        self.draw_legend(root)?;

        let fx = explanation.output_value();
        let segments = layout(explanation);
        let (lo, hi) = value_range(
            segments
                .iter()
                .flat_map(|s| [s.start, s.end])
                .chain([explanation.base_value, fx]),
        );

        let mut chart = ChartBuilder::on(root)
            .margin_left(MARGIN)
            .margin_right(MARGIN)
            .margin_top(TOP_MARGIN)
            .margin_bottom(8)
            .x_label_area_size(AXIS_AREA)
            .build_cartesian_2d(lo..hi, 0f64..1f64)?;

        chart
            .configure_mesh()
            .disable_mesh()
            .disable_y_axis()
            .x_labels(7)
            .x_label_formatter(&|v| format_number(*v))
            .x_label_style(font(12).color(&AXIS))
            .axis_style(AXIS)
            .draw()?;

        let area = chart.plotting_area();
        let (plot_width, plot_height) = area.dim_in_pixel();
        let px_per_unit = plot_width as f64 / (hi - lo);
        let band_px = (BAND_HI - BAND_LO) * plot_height as f64;

        for segment in &segments {
            let color = if segment.increases {
                self.increase
            } else {
                self.decrease
            };
            let depth =
                (band_px * 0.25 / px_per_unit).min((segment.end - segment.start).abs() / 2.0);
            area.draw(&Polygon::new(
                chevron(segment.start, segment.end, depth, segment.increases),
                color.filled(),
            ))?;
        }

        let label_style = font(12).color(&TEXT).pos(Pos::new(HPos::Center, VPos::Top));
        for segment in &segments {
            let attribution = &explanation.attributions[segment.index];
            let label = format!("{} = {}", attribution.name, format_number(attribution.value));
            let (text_width, _) = area.estimate_text_size(&label, &label_style)?;
            let segment_px = (segment.end - segment.start).abs() * px_per_unit;
            if segment_px < text_width as f64 + 4.0 {
                continue;
            }
            let mid = (segment.start + segment.end) / 2.0;
            area.draw(&Text::new(label, (mid, LABEL_Y), label_style.clone()))?;
        }

        // Base value marker sits on the axis.
        let base = explanation.base_value;
        area.draw(&PathElement::new(vec![(base, 0.0), (base, BASE_Y)], AXIS))?;
        let base_label = format!("base value = {}", format_number(base));
        let base_style = font(12).color(&AXIS);
        let base_anchor = anchor(
            area.estimate_text_size(&base_label, &base_style)?.0,
            base,
            lo,
            hi,
            plot_width,
        );
        area.draw(&Text::new(
            base_label,
            (base, BASE_Y),
            base_style.pos(Pos::new(base_anchor, VPos::Bottom)),
        ))?;

        // Output marker runs from the band up to its label.
        area.draw(&PathElement::new(
            vec![(fx, BAND_LO), (fx, OUTPUT_Y)],
            TEXT.stroke_width(2),
        ))?;
        let output_label = format!("f(x) = {}", format_number(fx));
        let output_style = font(16).color(&TEXT);
        let output_anchor = anchor(
            area.estimate_text_size(&output_label, &output_style)?.0,
            fx,
            lo,
            hi,
            plot_width,
        );
        area.draw(&Text::new(
            output_label,
            (fx, OUTPUT_Y),
            output_style.pos(Pos::new(output_anchor, VPos::Bottom)),
        ))?;

        Ok(())
    }

    fn draw_legend<DB: DrawingBackend>(
        &self,
        root: &DrawingArea<DB, Shift>,
    ) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
        let mut x = MARGIN;
        for (text, color) in [("higher", self.increase), ("<>", TEXT), ("lower", self.decrease)] {
            let style = font(16).color(&color);
            root.draw(&Text::new(text, (x, LEGEND_Y), style.clone()))?;
            x += root.estimate_text_size(text, &style)?.0 as i32 + 12;
        }
        Ok(())
    }
}

fn font(size: u32) -> FontDesc<'static> {
    (FONT_FAMILY, size).into_font()
}

fn register_plot_font() -> anyhow::Result<()> {
    FONT_REGISTERED
        .get_or_init(|| {
            register_font(FONT_FAMILY, FontStyle::Normal, FONT).map_err(|_| "InvalidFont".to_string())
        })
        .clone()
        .map_err(|e| anyhow!("embedded plot font is invalid: {}", e))
}

/// Parse `#rrggbb` (the leading `#` is optional).
pub fn parse_hex_color(value: &str) -> anyhow::Result<RGBColor> {
    let digits = value.trim().trim_start_matches('#');
    let bytes = hex::decode(digits).with_context(|| format!("'{}' is not a hex color", value))?;
    match bytes.as_slice() {
        [r, g, b] => Ok(RGBColor(*r, *g, *b)),
        _ => bail!("'{}' is not a #rrggbb color", value),
    }
}

/// Axis range covering `values` with 10% padding on both sides.
fn value_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let span = hi - lo;
    let pad = if span > 0.0 {
        span * 0.1
    } else {
        lo.abs().max(1.0) * 0.1
    };
    (lo - pad, hi + pad)
}

/// Arrow outline between `start` and `end`. The notch on the trailing edge
/// matches the point of the neighbouring segment.
fn chevron(start: f64, end: f64, depth: f64, pointing_right: bool) -> Vec<(f64, f64)> {
    let (x0, x1) = (start.min(end), start.max(end));
    let mid = (BAND_LO + BAND_HI) / 2.0;
    if pointing_right {
        vec![
            (x0, BAND_HI),
            (x1 - depth, BAND_HI),
            (x1, mid),
            (x1 - depth, BAND_LO),
            (x0, BAND_LO),
            (x0 + depth, mid),
        ]
    } else {
        vec![
            (x0 + depth, BAND_HI),
            (x1, BAND_HI),
            (x1 - depth, mid),
            (x1, BAND_LO),
            (x0 + depth, BAND_LO),
            (x0, mid),
        ]
    }
}

/// Keep a label of `text_width` pixels inside the plot near its edges.
fn anchor(text_width: u32, value: f64, lo: f64, hi: f64, plot_width: u32) -> HPos {
    let x = (value - lo) / (hi - lo) * plot_width as f64;
    let half = text_width as f64 / 2.0;
    if x < half {
        HPos::Left
    } else if plot_width as f64 - x < half {
        HPos::Right
    } else {
        HPos::Center
    }
}

/// Up to two decimals with trailing zeros removed.
fn format_number(value: f64) -> String {
    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn encode_png(img: RgbImage) -> Result<Vec<u8>, PredictionError> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, ImageOutputFormat::Png)
        .map_err(|e| PredictionError::Render(format!("PNG encoding failed: {}", e)))?;
    Ok(buffer.into_inner())
}
