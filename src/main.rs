use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;

use seroviz::data::filter::{parse_variable_list, FilterPredicate, Scale};
use seroviz::data::model::SeriesType;
use seroviz::fit::{Method, ModelSpec};
use seroviz::{
    load_file, DatasetError, ErrorDetail, IndividualRequest, LoadOptions, QueryService, Response,
    SessionStore, Settings, TraceRequest,
};

#[derive(Parser, Debug)]
#[command(name = "seroviz")]
#[command(about = "Query and smooth longitudinal biomarker data", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    /// JSON settings file; every field is optional.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Covariates, biomarkers and index type of a dataset.
    Summary(DataArgs),
    /// Population trace for one biomarker, optionally split by covariates.
    Trace(TraceArgs),
    /// One page of per-subject series.
    Individual(IndividualArgs),
    /// Panel keys for a faceted layout over covariates.
    Facets(FacetArgs),
}

#[derive(Args, Debug)]
struct DataArgs {
    file: PathBuf,
    /// Index (time) column; defaults to the configured one.
    #[arg(long)]
    xcol: Option<String>,
    #[arg(long = "series-type")]
    series_type: Option<SeriesType>,
}

#[derive(Args, Debug)]
struct TraceArgs {
    #[command(flatten)]
    data: DataArgs,
    #[arg(long)]
    biomarker: String,
    /// `var:level` pairs joined by `+`.
    #[arg(long, default_value = "")]
    filter: String,
    /// Covariate names joined by `+`.
    #[arg(long, default_value = "")]
    disaggregate: String,
    #[arg(long, default_value = "natural")]
    scale: Scale,
    #[arg(long)]
    method: Option<Method>,
    #[arg(long)]
    span: Option<f64>,
    /// Polynomial degree cap.
    #[arg(long)]
    k: Option<usize>,
}

#[derive(Args, Debug)]
struct IndividualArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Subject id column.
    #[arg(long)]
    pid: String,
    #[arg(long, default_value = "")]
    filter: String,
    #[arg(long, default_value = "natural")]
    scale: Scale,
    #[arg(long)]
    color: Option<String>,
    #[arg(long)]
    linetype: Option<String>,
    #[arg(long, default_value_t = 1)]
    page: usize,
}

#[derive(Args, Debug)]
struct FacetArgs {
    #[command(flatten)]
    data: DataArgs,
    /// Covariate names joined by `+`.
    #[arg(long)]
    by: String,
}

fn emit<T: Serialize>(response: &Response<T>) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(response)?);
    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Session name derived from the file stem.
fn dataset_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let name: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if name.is_empty() {
        "dataset".to_string()
    } else {
        name
    }
}

/// Load `args.file` into `store`, or report why it was rejected.
fn upload(store: &SessionStore, args: &DataArgs, settings: &Settings) -> Result<Result<String, ErrorDetail>> {
    let options = LoadOptions {
        index_column: args
            .xcol
            .clone()
            .unwrap_or_else(|| settings.index_column.clone()),
        series_type: args.series_type.unwrap_or(settings.series_type),
    };
    let dataset = match load_file(&args.file, &options) {
        Ok(ds) => ds,
        Err(err) => {
            let detail = match err.downcast_ref::<DatasetError>() {
                Some(e) => ErrorDetail::from(e),
                None => ErrorDetail {
                    error: "UPLOAD_ERROR".to_string(),
                    detail: Some(format!("{err:#}")),
                },
            };
            return Ok(Err(detail));
        }
    };

    let name = dataset_name(&args.file);
    if let Err(e) = store.insert(&name, dataset) {
        return Ok(Err(ErrorDetail::from(&e)));
    }
    Ok(Ok(name))
}

fn run(cli: Cli) -> Result<ExitCode> {
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    let store = SessionStore::new();

    let data = match &cli.command {
        Command::Summary(data) => data,
        Command::Trace(args) => &args.data,
        Command::Individual(args) => &args.data,
        Command::Facets(args) => &args.data,
    };
    let name = match upload(&store, data, &settings)? {
        Ok(name) => name,
        Err(detail) => return emit(&Response::<()>::failure(detail)),
    };
    info!("registered '{}' as '{name}'", data.file.display());

    let service = QueryService::new(&store, settings);
    match cli.command {
        Command::Summary(_) => emit(&Response::from(service.metadata(&name))),
        Command::Trace(args) => {
            let defaults = service.settings().model;
            let model = ModelSpec::new(
                args.method.unwrap_or(defaults.method()),
                args.span.unwrap_or(defaults.span()),
                args.k.unwrap_or(defaults.degree_cap()),
            );
            let result = TraceRequest::from_wire(
                &args.biomarker,
                &args.filter,
                &args.disaggregate,
                args.scale,
                model,
            )
            .and_then(|request| service.trace(&name, &request));
            emit(&Response::from(result))
        }
        Command::Individual(args) => {
            let result = args.filter.parse::<FilterPredicate>().and_then(|filter| {
                let request = IndividualRequest {
                    filter,
                    scale: args.scale,
                    color: args.color,
                    linetype: args.linetype,
                    page: args.page,
                    ..IndividualRequest::new(args.pid)
                };
                service.individual(&name, &request)
            });
            emit(&Response::from(result))
        }
        Command::Facets(args) => {
            let variables = parse_variable_list(&args.by);
            emit(&Response::from(service.facets(&name, &variables)))
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
