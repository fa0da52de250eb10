//! Plotly-график: фактические и прогнозные месячные температуры.

use itertools::Itertools;
use plotly::color::Rgb;
use plotly::common::{Anchor, DashType, Font, Line, Mode, Orientation, Title};
use plotly::layout::{Axis, Layout, Legend, Margin};
use plotly::{Configuration, Plot, Scatter};

use crate::constants::UNIT_CELSIUS;
use crate::forecast::{ForecastPoint, PointKind};

const LABEL_ACTUAL: &str = "Actual";
const LABEL_PREDICTED: &str = "Predicted";
const FONT_FAMILY: &str = "IBM Plex Sans, Arial, sans-serif";
const FONT_SIZE_BASE: usize = 12;
const LINE_WIDTH_ACTUAL: f64 = 2.0;
const LINE_WIDTH_PREDICTED: f64 = 2.2;
const LEGEND_X: f64 = 0.5;
const LEGEND_Y: f64 = 1.02;
const MARGIN_LEFT: usize = 70;
const MARGIN_RIGHT: usize = 30;
const MARGIN_TOP: usize = 60;
const MARGIN_BOTTOM: usize = 50;
const COLOR_ACTUAL: (u8, u8, u8) = (36, 100, 166);
const COLOR_PREDICTED: (u8, u8, u8) = (200, 67, 46);
const COLOR_TEXT_BASE: (u8, u8, u8) = (40, 40, 40);

fn rgb(color: (u8, u8, u8)) -> Rgb {
    Rgb::new(color.0, color.1, color.2)
}

/// Дата первого числа месяца для оси X.
fn month_label(point: &ForecastPoint) -> String {
    format!("{:04}-{:02}-01", point.year, point.month)
}

fn series(points: &[&ForecastPoint], kind: PointKind) -> (Vec<String>, Vec<f64>) {
    points
        .iter()
        .filter(|point| point.kind == kind)
        .map(|point| (month_label(point), point.temperature))
        .unzip()
}

/// `None`, если рисовать нечего.
pub(super) fn build_temperature_chart(entity: &str, points: &[&ForecastPoint]) -> Option<Plot> {
    if points.is_empty() {
        return None;
    }
    let (actual_dates, actual_values) = series(points, PointKind::Actual);
    let (predicted_dates, predicted_values) = series(points, PointKind::Predicted);

    let mut plot = Plot::new();
    if !actual_dates.is_empty() {
        plot.add_trace(
            Scatter::new(actual_dates, actual_values)
                .mode(Mode::Lines)
                .line(Line::new().color(rgb(COLOR_ACTUAL)).width(LINE_WIDTH_ACTUAL))
                .name(LABEL_ACTUAL),
        );
    }
    if !predicted_dates.is_empty() {
        plot.add_trace(
            Scatter::new(predicted_dates, predicted_values)
                .mode(Mode::Lines)
                .line(
                    Line::new()
                        .color(rgb(COLOR_PREDICTED))
                        .width(LINE_WIDTH_PREDICTED)
                        .dash(DashType::Dash),
                )
                .name(LABEL_PREDICTED),
        );
    }

    let years = points.iter().map(|point| point.year).minmax().into_option();
    let title = match years {
        Some((first, last)) => format!("Average monthly temperature in {entity} ({first}–{last})"),
        None => format!("Average monthly temperature in {entity}"),
    };

    let layout = Layout::new()
        .title(Title::with_text(title))
        .font(
            Font::new()
                .family(FONT_FAMILY)
                .size(FONT_SIZE_BASE)
                .color(rgb(COLOR_TEXT_BASE)),
        )
        .auto_size(true)
        .margin(
            Margin::new()
                .left(MARGIN_LEFT)
                .right(MARGIN_RIGHT)
                .top(MARGIN_TOP)
                .bottom(MARGIN_BOTTOM),
        )
        .show_legend(true)
        .legend(
            Legend::new()
                .orientation(Orientation::Horizontal)
                .x(LEGEND_X)
                .x_anchor(Anchor::Center)
                .y(LEGEND_Y)
                .y_anchor(Anchor::Bottom),
        )
        .x_axis(Axis::new().title(Title::with_text("Date")).auto_margin(true))
        .y_axis(
            Axis::new()
                .title(Title::with_text(format!("Temperature ({UNIT_CELSIUS})")))
                .auto_margin(true),
        );

    plot.set_layout(layout);
    plot.set_configuration(Configuration::new().responsive(true));
    Some(plot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(year: i32, month: u32, kind: PointKind) -> ForecastPoint {
        ForecastPoint {
            entity: "Testland".to_string(),
            year,
            month,
            temperature: 10.0,
            kind,
        }
    }

    #[test]
    fn no_points_means_no_chart() {
        assert!(build_temperature_chart("Testland", &[]).is_none());
    }

    #[test]
    fn traces_are_split_by_kind() {
        let points = [
            point(2024, 11, PointKind::Actual),
            point(2024, 12, PointKind::Predicted),
        ];
        let refs: Vec<&ForecastPoint> = points.iter().collect();
        let (dates, _) = series(&refs, PointKind::Predicted);
        assert_eq!(dates, vec!["2024-12-01".to_string()]);
        let plot = build_temperature_chart("Testland", &refs).unwrap();
        let html = plot.to_inline_html(Some("temperature-plot"));
        assert!(html.contains(LABEL_ACTUAL));
        assert!(html.contains(LABEL_PREDICTED));
    }
}
