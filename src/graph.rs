use crate::model::{Rating, Status};
use crate::report::{LeaderboardEntry, StatusCount, TrendPoint};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::io::Cursor;

/// Chart rendering failures
#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("failed to draw chart: {0}")]
    Draw(String),

    #[error("failed to encode chart: {0}")]
    Encode(#[from] image::ImageError),
}

fn draw_err<E: std::fmt::Display>(err: E) -> ChartError {
    ChartError::Draw(err.to_string())
}

/// Size and caption of a rendered chart
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Width of the chart in pixels
    pub width: u32,

    /// Height of the chart in pixels
    pub height: u32,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: "Chart".to_string(),
            width: 800,
            height: 600,
        }
    }
}

impl ChartOptions {
    pub fn titled(&self, title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..self.clone()
        }
    }
}

fn status_color(status: Status) -> RGBColor {
    match status {
        Status::Achieved => RGBColor(46, 160, 67),
        Status::PartiallyAchieved => RGBColor(240, 173, 78),
        Status::NotCompleted => RGBColor(217, 83, 79),
        Status::InProgress => RGBColor(66, 139, 202),
        Status::Assigned => RGBColor(153, 102, 204),
        Status::Pending => RGBColor(160, 160, 160),
    }
}

// Renders into an RGB buffer and encodes it as PNG.
fn render(
    options: &ChartOptions,
    draw: impl FnOnce(&DrawingArea<BitMapBackend<'_>, Shift>) -> Result<(), ChartError>,
) -> Result<Vec<u8>, ChartError> {
    let (width, height) = (options.width, options.height);
    let mut buffer = vec![0u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(draw_err)?;
        draw(&root)?;
        root.present().map_err(draw_err)?;
    }

    let image = image::RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| ChartError::Draw("pixel buffer does not match chart size".to_string()))?;
    let mut png = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image).write_to(&mut png, image::ImageOutputFormat::Png)?;
    Ok(png.into_inner())
}

fn draw_empty(root: &DrawingArea<BitMapBackend<'_>, Shift>, options: &ChartOptions) -> Result<(), ChartError> {
    let area = root
        .titled(&options.title, ("sans-serif", 30).into_font())
        .map_err(draw_err)?;
    let (w, h) = area.dim_in_pixel();
    area.draw(&Text::new(
        "No data yet",
        (w as i32 / 2 - 60, h as i32 / 2),
        ("sans-serif", 24).into_font(),
    ))
    .map_err(draw_err)
}

/// Pie chart of goal counts per status
pub fn status_pie(distribution: &[StatusCount], options: &ChartOptions) -> Result<Vec<u8>, ChartError> {
    render(options, |root| {
        if distribution.is_empty() {
            return draw_empty(root, options);
        }

        let area = root
            .titled(&options.title, ("sans-serif", 30).into_font())
            .map_err(draw_err)?;
        let (w, h) = area.dim_in_pixel();
        let center = (w as i32 / 2, h as i32 / 2);
        let radius = f64::from(w.min(h)) * 0.35;

        let sizes: Vec<f64> = distribution.iter().map(|c| c.count as f64).collect();
        let colors: Vec<RGBColor> = distribution.iter().map(|c| status_color(c.status)).collect();
        let labels: Vec<String> = distribution
            .iter()
            .map(|c| format!("{} ({})", c.status, c.count))
            .collect();

        let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
        pie.label_style(("sans-serif", 16).into_font().color(&BLACK));
        area.draw(&pie).map_err(draw_err)
    })
}

/// Bar chart of mean rating per resource, in leaderboard order
pub fn leaderboard_bars(entries: &[LeaderboardEntry], options: &ChartOptions) -> Result<Vec<u8>, ChartError> {
    render(options, |root| {
        if entries.is_empty() {
            return draw_empty(root, options);
        }

        let names: Vec<&str> = entries.iter().map(|e| e.resource.as_str()).collect();
        let mut chart = ChartBuilder::on(root)
            .caption(&options.title, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(40)
            .build_cartesian_2d(0i32..entries.len() as i32, 0f64..f64::from(Rating::MAX))
            .map_err(draw_err)?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_labels(entries.len())
            .x_label_formatter(&|x| names.get(*x as usize).map(|n| n.to_string()).unwrap_or_default())
            .y_desc("Mean rating")
            .draw()
            .map_err(draw_err)?;

        chart
            .draw_series(entries.iter().enumerate().map(|(i, e)| {
                let mut bar = Rectangle::new(
                    [(i as i32, 0.0), (i as i32 + 1, e.mean_rating)],
                    BLUE.filled(),
                );
                bar.set_margin(0, 0, 8, 8);
                bar
            }))
            .map_err(draw_err)?;
        Ok(())
    })
}

/// Line chart of achievement rate per target month
pub fn trend_line(points: &[TrendPoint], options: &ChartOptions) -> Result<Vec<u8>, ChartError> {
    render(options, |root| {
        if points.is_empty() {
            return draw_empty(root, options);
        }

        let labels: Vec<&str> = points.iter().map(|p| p.label.as_str()).collect();
        let mut chart = ChartBuilder::on(root)
            .caption(&options.title, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(0i32..points.len() as i32, 0f64..100f64)
            .map_err(draw_err)?;

        chart
            .configure_mesh()
            .x_labels(points.len())
            .x_label_formatter(&|x| labels.get(*x as usize).map(|l| l.to_string()).unwrap_or_default())
            .y_desc("Achieved (%)")
            .draw()
            .map_err(draw_err)?;

        let series: Vec<(i32, f64)> = points
            .iter()
            .enumerate()
            .map(|(i, p)| (i as i32, p.achievement_rate))
            .collect();

        chart
            .draw_series(LineSeries::new(series.iter().copied(), &BLUE))
            .map_err(draw_err)?;
        chart
            .draw_series(series.iter().map(|&(x, y)| Circle::new((x, y), 4, BLUE.filled())))
            .map_err(draw_err)?;
        Ok(())
    })
}
