//! Рендер HTML-страницы отчёта.

use chrono::{DateTime, Utc};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use plotly::Plot;

use super::Overview;
use crate::constants::UNIT_CELSIUS;

const PAGE_TITLE: &str = "Surface temperature forecast";
const PAGE_DESCRIPTION: &str = "Monthly surface temperature history and gradient-boosted forecast per country.";
const PLOT_ID: &str = "temperature-plot";
const PLOTLY_CDN: &str = "https://cdn.plot.ly/plotly-2.35.2.min.js";
const GENERATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M UTC";
const NO_DATA: &str = "No data available to display the chart";
const PLACEHOLDER: &str = "—";
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const STYLE: &str = "
:root {
    color-scheme: light;
    --bg: #f7f6f2;
    --card: #ffffff;
    --ink: #1f2430;
    --muted: #56606f;
    --accent: #2464a6;
    --warn: #c8432e;
    --border: rgba(31, 36, 48, 0.08);
}
* { box-sizing: border-box; }
body {
    margin: 0;
    background: var(--bg);
    color: var(--ink);
    font-family: \"IBM Plex Sans\", \"PT Sans\", sans-serif;
}
.page { max-width: 1240px; margin: 40px auto 60px; padding: 0 24px; }
.title { font-size: 26px; font-weight: 600; margin: 0 0 6px; }
.subtitle { margin: 0 0 22px; color: var(--muted); font-size: 13px; }
.summary-grid {
    display: grid;
    grid-template-columns: repeat(auto-fit, minmax(200px, 1fr));
    gap: 12px;
    margin-bottom: 18px;
}
.summary-card, .card {
    background: var(--card);
    border-radius: 18px;
    padding: 16px;
    border: 1px solid var(--border);
}
.summary-label { color: var(--muted); font-size: 12px; text-transform: uppercase; }
.summary-value { font-size: 22px; font-weight: 600; margin-top: 6px; }
.summary-sub { color: var(--muted); font-size: 12px; margin-top: 4px; }
.warning { color: var(--warn); font-weight: 500; }
#temperature-plot { min-height: 480px; }
footer { margin-top: 18px; color: var(--muted); font-size: 12px; }
";

fn format_temperature(value: Option<f64>) -> String {
    value.map_or_else(
        || PLACEHOLDER.to_string(),
        |value| format!("{value:.2} {UNIT_CELSIUS}"),
    )
}

fn format_delta(delta: Option<f64>, percent: Option<f64>) -> (String, String) {
    let delta = delta.map_or_else(
        || PLACEHOLDER.to_string(),
        |value| format!("{value:+.2} {UNIT_CELSIUS}"),
    );
    let percent = percent.map_or_else(|| PLACEHOLDER.to_string(), |value| format!("{value:+.1}%"));
    (delta, percent)
}

fn summary_card(label: &str, value: &str, sub: &str) -> Markup {
    html! {
        div class="summary-card" {
            div class="summary-label" { (label) }
            div class="summary-value" { (value) }
            div class="summary-sub" { (sub) }
        }
    }
}

pub(super) fn render_report_page(
    plot: Option<&Plot>,
    overview: &Overview,
    generated_at: DateTime<Utc>,
) -> String {
    let generated_label = generated_at.format(GENERATED_AT_FORMAT).to_string();
    let continent = overview.continent.as_deref().unwrap_or(PLACEHOLDER);
    let zone_label = overview
        .climate
        .climate_zone
        .map_or_else(|| "n/a".to_string(), |zone| zone.to_string());
    let climate_sub = if overview.climate.is_available() {
        format!(
            "Average annual: {:.2} {UNIT_CELSIUS}",
            overview.climate.average_annual_temperature
        )
    } else {
        "Not enough observations".to_string()
    };
    let (delta_label, percent_label) = format_delta(overview.trend_delta, overview.trend_percent);
    let rmse_label = overview
        .rmse
        .map_or_else(|| PLACEHOLDER.to_string(), |value| format!("RMSE {value:.2} {UNIT_CELSIUS}"));
    let plot_html = plot.map(|plot| plot.to_inline_html(Some(PLOT_ID)));

    let page = html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                meta name="description" content=(PAGE_DESCRIPTION);
                title { (PAGE_TITLE) " · " (overview.entity) }
                script src=(PLOTLY_CDN) {}
                style { (PreEscaped(STYLE)) }
            }
            body {
                div class="page" {
                    header {
                        h1 class="title" { (PAGE_TITLE) ": " (overview.entity) }
                        p class="subtitle" { (PAGE_DESCRIPTION) }
                    }
                    section class="summary-grid" {
                        (summary_card("Continent", continent, &overview.entity))
                        (summary_card("Climate zone", &zone_label, &climate_sub))
                        (summary_card(
                            "Historical average",
                            &format_temperature(overview.historical_average),
                            "Actual observations"
                        ))
                        (summary_card(
                            "Predicted average",
                            &format_temperature(overview.predicted_average),
                            &rmse_label
                        ))
                        (summary_card("Trend", &delta_label, &percent_label))
                    }
                    div class="card" {
                        @if let Some(plot_html) = plot_html {
                            (PreEscaped(plot_html))
                        } @else {
                            p class="warning" { (NO_DATA) }
                        }
                    }
                    footer {
                        "Version: " (APP_VERSION) " · Generated: " (generated_label)
                    }
                }
            }
        }
    };
    page.into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_keeps_sign() {
        let (delta, percent) = format_delta(Some(-0.5), Some(-4.0));
        assert_eq!(delta, format!("-0.50 {UNIT_CELSIUS}"));
        assert_eq!(percent, "-4.0%");
        let (delta, percent) = format_delta(None, None);
        assert_eq!((delta.as_str(), percent.as_str()), (PLACEHOLDER, PLACEHOLDER));
    }

    #[test]
    fn missing_average_is_a_placeholder() {
        assert_eq!(format_temperature(None), PLACEHOLDER);
        assert_eq!(format_temperature(Some(12.346)), format!("12.35 {UNIT_CELSIUS}"));
    }
}
