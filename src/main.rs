mod boosting;
mod climate;
mod config;
mod constants;
mod dataset;
mod error;
mod features;
mod forecast;
mod global;
mod model;
mod report;

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::climate::{ClimateClassification, classify_climate_zone};
use crate::config::{DEFAULT_MODEL_CONFIG, ResolvedConfig, load_model_config};
use crate::dataset::Dataset;
use crate::error::ForecastError;
use crate::forecast::{EntityForecast, ForecastPoint, create_parent_dir, predict_temperature};
use clap_complete::{Shell, generate};
use itertools::Itertools;
use tqdm::pbar;
use tracing_subscriber::EnvFilter;

const APP_ABOUT: &str = "tempcast - Monthly surface temperature forecasts and climate zones per country";
const DEFAULT_DATASET_CSV: &str = "data/average-monthly-surface-temperature.csv";
const DEFAULT_FORECAST_CSV: &str = "dist/forecast.csv";
const DEFAULT_GLOBAL_FORECAST_CSV: &str = "dist/global-forecast.csv";
const DEFAULT_OUTPUT_HTML: &str = "dist/index.html";
const CSV_ARCHIVE_EXTENSION: &str = "gz";
const JSON_EXTENSION: &str = "json";

#[derive(Parser, Debug)]
#[command(name = "tempcast", about = APP_ABOUT)]
struct Args {
    /// Архивировать CSV в .csv.gz; исходные CSV удаляются после успешной архивации.
    #[arg(long = "archive-csv", global = true)]
    archive_csv: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Обучить модель для страны и сохранить факт вместе с прогнозом.
    Forecast {
        /// CSV с месячными температурами.
        #[arg(short = 'c', long = "csv", value_name = "PATH", default_value = DEFAULT_DATASET_CSV)]
        csv: PathBuf,
        /// Страна (значение колонки `Entity`).
        #[arg(short = 'e', long = "entity", value_name = "NAME")]
        entity: String,
        /// Куда сохранить результат.
        #[arg(
            short = 'o',
            long = "output",
            value_name = "PATH",
            default_value = DEFAULT_FORECAST_CSV
        )]
        output: PathBuf,
        /// Сохранить JSON вместо CSV.
        #[arg(long = "json")]
        json: bool,
        /// Последний год прогноза (по умолчанию из конфигурации).
        #[arg(long = "end-year", value_name = "YEAR")]
        end_year: Option<i32>,
        /// TOML-файл с параметрами модели.
        #[arg(long = "model-config", value_name = "PATH", default_value = DEFAULT_MODEL_CONFIG)]
        model_config: PathBuf,
    },
    /// Определить климатическую зону по фактическим строкам CSV прогноза.
    Classify {
        /// CSV, сохранённый командой forecast.
        #[arg(
            short = 'f',
            long = "forecast-csv",
            value_name = "PATH",
            default_value = DEFAULT_FORECAST_CSV
        )]
        forecast_csv: PathBuf,
        /// Страна; по умолчанию все страны из файла.
        #[arg(short = 'e', long = "entity", value_name = "NAME")]
        entity: Option<String>,
        /// Печатать JSON.
        #[arg(long = "json")]
        json: bool,
        /// TOML-файл с параметрами модели.
        #[arg(long = "model-config", value_name = "PATH", default_value = DEFAULT_MODEL_CONFIG)]
        model_config: PathBuf,
    },
    /// Сгенерировать HTML-отчёт по CSV прогноза.
    Render {
        /// CSV, сохранённый командой forecast.
        #[arg(
            short = 'f',
            long = "forecast-csv",
            value_name = "PATH",
            default_value = DEFAULT_FORECAST_CSV
        )]
        forecast_csv: PathBuf,
        /// Страна для отчёта.
        #[arg(short = 'e', long = "entity", value_name = "NAME")]
        entity: String,
        /// Исходный датасет (нужен только для континента).
        #[arg(short = 'c', long = "csv", value_name = "PATH")]
        csv: Option<PathBuf>,
        /// Куда сохранить HTML.
        #[arg(
            short = 'o',
            long = "output-html",
            value_name = "PATH",
            default_value = DEFAULT_OUTPUT_HTML
        )]
        output_html: PathBuf,
        /// Не минифицировать HTML (по умолчанию минифицируется).
        #[arg(
            long = "no-minify-html",
            default_value_t = true,
            action = ArgAction::SetFalse
        )]
        minify_html: bool,
        /// TOML-файл с параметрами модели.
        #[arg(long = "model-config", value_name = "PATH", default_value = DEFAULT_MODEL_CONFIG)]
        model_config: PathBuf,
    },
    /// Полный режим: обучение, CSV прогноза и HTML-отчёт для страны.
    Run {
        #[arg(short = 'c', long = "csv", value_name = "PATH", default_value = DEFAULT_DATASET_CSV)]
        csv: PathBuf,
        #[arg(short = 'e', long = "entity", value_name = "NAME")]
        entity: String,
        #[arg(
            long = "output-forecast-csv",
            value_name = "PATH",
            default_value = DEFAULT_FORECAST_CSV
        )]
        output_forecast_csv: PathBuf,
        #[arg(
            short = 'o',
            long = "output-html",
            value_name = "PATH",
            default_value = DEFAULT_OUTPUT_HTML
        )]
        output_html: PathBuf,
        /// Не минифицировать HTML (по умолчанию минифицируется).
        #[arg(
            long = "no-minify-html",
            default_value_t = true,
            action = ArgAction::SetFalse
        )]
        minify_html: bool,
        #[arg(long = "end-year", value_name = "YEAR")]
        end_year: Option<i32>,
        #[arg(long = "model-config", value_name = "PATH", default_value = DEFAULT_MODEL_CONFIG)]
        model_config: PathBuf,
    },
    /// Прогноз для каждой страны датасета в один CSV.
    ForecastAll {
        #[arg(short = 'c', long = "csv", value_name = "PATH", default_value = DEFAULT_DATASET_CSV)]
        csv: PathBuf,
        #[arg(
            short = 'o',
            long = "output",
            value_name = "PATH",
            default_value = DEFAULT_FORECAST_CSV
        )]
        output: PathBuf,
        #[arg(long = "end-year", value_name = "YEAR")]
        end_year: Option<i32>,
        #[arg(long = "model-config", value_name = "PATH", default_value = DEFAULT_MODEL_CONFIG)]
        model_config: PathBuf,
    },
    /// Одна модель по годовым температурам всех стран (кодировщики страны и континента).
    ForecastGlobal {
        #[arg(short = 'c', long = "csv", value_name = "PATH", default_value = DEFAULT_DATASET_CSV)]
        csv: PathBuf,
        #[arg(
            short = 'o',
            long = "output",
            value_name = "PATH",
            default_value = DEFAULT_GLOBAL_FORECAST_CSV
        )]
        output: PathBuf,
        #[arg(long = "end-year", value_name = "YEAR")]
        end_year: Option<i32>,
        #[arg(long = "model-config", value_name = "PATH", default_value = DEFAULT_MODEL_CONFIG)]
        model_config: PathBuf,
    },
    /// Сгенерировать файлы автодополнения для shell.
    Completions {
        /// Целевой shell.
        #[arg(value_enum)]
        shell: Shell,
        /// Куда сохранить файл (по умолчанию stdout).
        #[arg(short = 'o', long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn generate_completions(shell: Shell, output: Option<PathBuf>) -> Result<(), String> {
    let mut cmd = Args::command();
    let bin_name = cmd.get_name().to_string();
    if let Some(path) = output {
        ensure_parent(&path)?;
        let mut file = File::create(&path)
            .map_err(|err| format!("Failed to create {}: {err}", path.display()))?;
        generate(shell, &mut cmd, bin_name, &mut file);
    } else {
        let mut stdout = std::io::stdout();
        generate(shell, &mut cmd, bin_name, &mut stdout);
    }
    Ok(())
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tempcast=info"));
    let ansi = std::io::stdout().is_terminal();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(ansi)
        .compact()
        .init();
}

fn headline(message: &str) {
    tracing::info!(status = "start", "{message}");
}

fn info(message: &str) {
    tracing::info!(status = "info", "{message}");
}

fn success(message: &str) {
    tracing::info!(status = "ok", "{message}");
}

fn error(message: &str) {
    tracing::error!(status = "err", "{message}");
}

fn ensure_parent(path: &Path) -> Result<(), String> {
    create_parent_dir(path)
        .map_err(|err| format!("Failed to create directory for {}: {err}", path.display()))
}

fn archive_path_for(csv_path: &Path) -> Result<PathBuf, String> {
    let file_name = csv_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| format!("Path {} has no file name", csv_path.display()))?;
    let mut archive_path = csv_path.to_path_buf();
    archive_path.set_file_name(format!("{file_name}.{CSV_ARCHIVE_EXTENSION}"));
    Ok(archive_path)
}

/// Сжимает CSV в `.csv.gz` и удаляет исходник.
fn archive_csv_file(csv_path: &Path) -> Result<PathBuf, String> {
    let archive_path = archive_path_for(csv_path)?;
    ensure_parent(&archive_path)?;
    let mut input = File::open(csv_path)
        .map_err(|err| format!("Failed to open CSV {}: {err}", csv_path.display()))?;
    let output = File::create(&archive_path)
        .map_err(|err| format!("Failed to create archive {}: {err}", archive_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)
        .map_err(|err| format!("Failed to write archive {}: {err}", archive_path.display()))?;
    encoder.finish().map_err(|err| {
        format!(
            "Failed to finalize archive {}: {err}",
            archive_path.display()
        )
    })?;
    fs::remove_file(csv_path)
        .map_err(|err| format!("Failed to remove CSV {}: {err}", csv_path.display()))?;
    Ok(archive_path)
}

fn finish_csv(csv_path: &Path, archive_csv: bool) -> Result<(), String> {
    if archive_csv {
        let archive = archive_csv_file(csv_path)?;
        success(&format!("Saved archive to {}", archive.display()));
    } else {
        success(&format!("Saved CSV to {}", csv_path.display()));
    }
    Ok(())
}

fn load_config(path: &Path, end_year: Option<i32>) -> Result<ResolvedConfig, String> {
    let cfg = load_model_config(path)?;
    Ok(match end_year {
        Some(end_year) => cfg.with_end_year(end_year),
        None => cfg,
    })
}

fn load_dataset(csv: &Path) -> Result<Dataset, String> {
    info(&format!("Reading dataset {}", csv.display()));
    Dataset::from_path(csv).map_err(|err| format!("Failed to read dataset: {err}"))
}

fn forecast_entity(
    dataset: &Dataset,
    entity: &str,
    cfg: &ResolvedConfig,
) -> Result<EntityForecast, ForecastError> {
    let series = dataset.monthly_series(entity)?;
    predict_temperature(&series, &cfg.training, &cfg.forecast)
}

fn render_entity(
    points: &[ForecastPoint],
    entity: &str,
    continent: Option<&str>,
    rmse: Option<f64>,
    output_html: &Path,
    minify_html: bool,
    cfg: &ResolvedConfig,
) -> Result<(), String> {
    let overview =
        report::build_overview(points, entity, continent, &cfg.report, &cfg.climate, rmse);
    info(&overview.climate.to_string());
    report::render_report(points, &overview, &cfg.report, output_html, minify_html)
        .map_err(|err| format!("Failed to render report: {err}"))?;
    success(&format!("Saved HTML to {}", output_html.display()));
    Ok(())
}

fn print_classifications(results: &[ClimateClassification], json: bool) -> Result<(), String> {
    if json {
        let body = serde_json::to_string_pretty(results).map_err(|err| err.to_string())?;
        println!("{body}");
    } else {
        for result in results {
            println!("{result}");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_lines)]
fn run(command: Command, archive_csv: bool) -> Result<(), String> {
    match command {
        Command::Completions { shell, output } => generate_completions(shell, output),
        Command::Forecast {
            csv,
            entity,
            output,
            json,
            end_year,
            model_config,
        } => {
            let cfg = load_config(&model_config, end_year)?;
            tracing::info!(
                mode = "forecast",
                entity = %entity,
                end_year = cfg.forecast.end_year,
                input_csv = %csv.display(),
                output = %output.display(),
                json,
                "Training forecast model"
            );
            let dataset = load_dataset(&csv)?;
            let forecast = forecast_entity(&dataset, &entity, &cfg)
                .map_err(|err| format!("Failed to forecast {entity}: {err}"))?;
            info(&format!(
                "{}: {} actual and {} predicted months",
                forecast.entity,
                forecast.actual().count(),
                forecast.predicted().count()
            ));
            tracing::info!(
                entity = %forecast.entity,
                train_rows = forecast.train_rows,
                test_rows = forecast.test_rows,
                clip_lower = forecast.bounds.lower,
                clip_upper = forecast.bounds.upper,
                "Model summary"
            );
            if json {
                let path = output.with_extension(JSON_EXTENSION);
                forecast::write_forecast_json(&forecast.points, &path)
                    .map_err(|err| format!("Failed to write forecast JSON: {err}"))?;
                success(&format!("Saved JSON to {}", path.display()));
                return Ok(());
            }
            forecast::write_forecast_csv(&forecast.points, &output)
                .map_err(|err| format!("Failed to write forecast CSV: {err}"))?;
            finish_csv(&output, archive_csv)
        }
        Command::Classify {
            forecast_csv,
            entity,
            json,
            model_config,
        } => {
            let cfg = load_config(&model_config, None)?;
            let points = forecast::read_forecast_csv(&forecast_csv)
                .map_err(|err| format!("Failed to read forecast CSV: {err}"))?;
            let entities = match entity {
                Some(entity) => vec![entity],
                None => points
                    .iter()
                    .map(|point| point.entity.clone())
                    .sorted()
                    .dedup()
                    .collect(),
            };
            let results = entities
                .iter()
                .map(|entity| classify_climate_zone(&points, entity, &cfg.climate))
                .collect_vec();
            for result in results.iter().filter(|result| !result.is_available()) {
                tracing::warn!(entity = %result.entity, "No data available for climate zone");
            }
            print_classifications(&results, json)
        }
        Command::Render {
            forecast_csv,
            entity,
            csv,
            output_html,
            minify_html,
            model_config,
        } => {
            let cfg = load_config(&model_config, None)?;
            tracing::info!(
                mode = "render",
                entity = %entity,
                forecast_csv = %forecast_csv.display(),
                output_html = %output_html.display(),
                minify_html,
                "Rendering HTML report"
            );
            let points = forecast::read_forecast_csv(&forecast_csv)
                .map_err(|err| format!("Failed to read forecast CSV: {err}"))?;
            let dataset = csv.as_deref().map(load_dataset).transpose()?;
            let continent = dataset
                .as_ref()
                .and_then(|dataset| dataset.continent(&entity));
            render_entity(
                &points,
                &entity,
                continent,
                None,
                &output_html,
                minify_html,
                &cfg,
            )
        }
        Command::Run {
            csv,
            entity,
            output_forecast_csv,
            output_html,
            minify_html,
            end_year,
            model_config,
        } => {
            let cfg = load_config(&model_config, end_year)?;
            tracing::info!(
                mode = "run",
                entity = %entity,
                archive_csv,
                end_year = cfg.forecast.end_year,
                input_csv = %csv.display(),
                output_forecast_csv = %output_forecast_csv.display(),
                output_html = %output_html.display(),
                minify_html,
                "Starting full pipeline"
            );
            let dataset = load_dataset(&csv)?;
            let forecast = forecast_entity(&dataset, &entity, &cfg)
                .map_err(|err| format!("Failed to forecast {entity}: {err}"))?;
            forecast::write_forecast_csv(&forecast.points, &output_forecast_csv)
                .map_err(|err| format!("Failed to write forecast CSV: {err}"))?;
            finish_csv(&output_forecast_csv, archive_csv)?;
            render_entity(
                &forecast.points,
                &forecast.entity,
                forecast.continent.as_deref(),
                forecast.rmse,
                &output_html,
                minify_html,
                &cfg,
            )
        }
        Command::ForecastAll {
            csv,
            output,
            end_year,
            model_config,
        } => {
            let cfg = load_config(&model_config, end_year)?;
            let dataset = load_dataset(&csv)?;
            let entities = dataset.entities();
            tracing::info!(
                mode = "forecast-all",
                entities = entities.len(),
                end_year = cfg.forecast.end_year,
                output = %output.display(),
                "Forecasting every entity"
            );
            let mut points = Vec::new();
            let mut skipped = 0usize;
            let mut pbar = pbar(Some(entities.len()));
            for entity in entities {
                match forecast_entity(&dataset, entity, &cfg) {
                    Ok(forecast) => points.extend(forecast.points),
                    Err(err @ ForecastError::InsufficientData { .. }) => {
                        tracing::warn!(entity, error = %err, "Skipping entity");
                        skipped += 1;
                    }
                    Err(err) => return Err(format!("Failed to forecast {entity}: {err}")),
                }
                if let Err(err) = pbar.update(1) {
                    tracing::warn!(error = %err, "Failed to update progress bar");
                }
            }
            if skipped > 0 {
                info(&format!("Skipped {skipped} entities without enough history"));
            }
            forecast::write_forecast_csv(&points, &output)
                .map_err(|err| format!("Failed to write forecast CSV: {err}"))?;
            finish_csv(&output, archive_csv)
        }
        Command::ForecastGlobal {
            csv,
            output,
            end_year,
            model_config,
        } => {
            let cfg = load_config(&model_config, end_year)?;
            let dataset = load_dataset(&csv)?;
            let observations = dataset
                .annual_observations()
                .map_err(|err| format!("Failed to build annual observations: {err}"))?;
            let model = global::fit_global(&observations, &cfg.training)
                .map_err(|err| format!("Failed to train global model: {err}"))?;
            match model.rmse {
                Some(rmse) => info(&format!("Global model RMSE: {rmse:.4} °C")),
                None => info("Global model RMSE: n/a (no hold-out rows)"),
            }
            let requests = observations
                .iter()
                .map(|obs| (obs.entity.clone(), obs.continent.clone()))
                .unique()
                .collect_vec();
            let rows = model
                .forecast(&requests, cfg.forecast.end_year)
                .map_err(|err| format!("Failed to forecast: {err}"))?;
            global::write_annual_forecast_csv(&rows, &output)
                .map_err(|err| format!("Failed to write global forecast CSV: {err}"))?;
            finish_csv(&output, archive_csv)
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let archive_csv = args.archive_csv;
    // Автодополнение пишется в stdout, логи там не нужны.
    let logging = !matches!(args.command, Command::Completions { .. });
    if logging {
        init_logging();
        headline(APP_ABOUT);
    }
    match run(args.command, archive_csv) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if logging => {
            error(&err);
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
