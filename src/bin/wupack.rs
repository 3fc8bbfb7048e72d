//! wupack - package a container image as a grid work unit
//!
//! ## Usage
//!
//! ```sh
//! wupack [OPTIONS] IMAGE [COMMAND]...
//! wupack --inspect IMAGE
//! ```
//!
//! Prints the name of the created work unit on success. Progress goes to
//! stderr through `tracing`; set `RUST_LOG` to change the level.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wupack::constants::{RSC_DISK_BOUND_KEY, RSC_MEMORY_BOUND_KEY, WU_TEMPLATE_KEY};
use wupack::inputs::parse_input_spec;
use wupack::resources::memory_from_deprecated_mb;
use wupack::{
    CommandLine, CreateWorkCli, DockerCli, DownloadHierarchy, Error, ImageRef, InputFile,
    JobOption, PackConfig, PackRequest, Packager, Result, inspect_image,
};

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "wupack")]
#[command(version)]
#[command(about = "Package a container image and command as a grid work unit")]
struct Cli {
    /// Container image to run
    #[arg(value_name = "IMAGE")]
    image: String,

    /// Command to run in the container
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Overwrite the default ENTRYPOINT of the image
    #[arg(long)]
    entrypoint: Option<String>,

    /// Application name [default: from config, else boinc2docker]
    #[arg(long)]
    appname: Option<String>,

    /// Let the grid client unzip image files
    #[arg(long, action)]
    native_unzip: bool,

    /// Deprecated: use --rsc-memory-bound instead (megabytes)
    #[arg(long, value_name = "MB")]
    memory: Option<u64>,

    /// Memory in bytes needed by this job [default: minimum needed to load the image]
    #[arg(long, value_name = "BYTES")]
    rsc_memory_bound: Option<u64>,

    /// Disk space in bytes needed by this job [default: minimum needed to load the image]
    #[arg(long, value_name = "BYTES")]
    rsc_disk_bound: Option<u64>,

    /// Reimport the image even if it is already imported
    #[arg(long, action)]
    force_reimport: bool,

    /// Only print warnings and errors
    #[arg(long, action)]
    quiet: bool,

    /// Shell command run in the VM before the container (repeatable)
    #[arg(long, value_name = "CMD")]
    prerun: Vec<String>,

    /// Shell command run in the VM after the container (repeatable)
    #[arg(long, value_name = "CMD")]
    postrun: Vec<String>,

    /// Extra input file: open_name=path[:flag,flag] (repeatable)
    #[arg(long, value_name = "SPEC")]
    input: Vec<String>,

    /// Extra create_work option: key=value (repeatable)
    #[arg(long, value_name = "KEY=VALUE")]
    wu_opt: Vec<String>,

    /// Extra vbox_job.xml option: name or name=value (repeatable)
    #[arg(long, value_name = "NAME[=VALUE]")]
    vbox_opt: Vec<String>,

    /// File the job writes its fraction done into
    #[arg(long, value_name = "PATH")]
    progress_file: Option<String>,

    /// Keep the VM wrapper's automatic checkpoints
    #[arg(long, action)]
    enable_checkpoints: bool,

    /// Configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Scheduler project directory (overrides the config file)
    #[arg(long, value_name = "DIR")]
    project_dir: Option<PathBuf>,

    /// Print image identity, size and default bounds, then exit
    #[arg(long, action)]
    inspect: bool,
}

/// Options create_work gets from the packager itself.
const RESERVED_WU_OPTS: &[&str] = &["appname", WU_TEMPLATE_KEY, RSC_MEMORY_BOUND_KEY, RSC_DISK_BOUND_KEY];

fn parse_key_value(arg: &str) -> Result<(String, String)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(Error::InvalidInput(format!("expected key=value, got '{}'", arg))),
    }
}

fn parse_vbox_opt(arg: &str) -> Result<JobOption> {
    let (name, value) = match arg.split_once('=') {
        Some((name, value)) => (name, Some(value)),
        None => (arg, None),
    };
    // Same naming rules as file flags: plain XML element names.
    name.parse::<wupack::FileFlag>()
        .map_err(|_| Error::InvalidInput(format!("invalid vbox_job.xml option '{}'", name)))?;
    Ok(match value {
        Some(value) => JobOption::Value(name.to_string(), value.to_string()),
        None => JobOption::Flag(name.to_string()),
    })
}

// =============================================================================
// Commands
// =============================================================================

fn build_request(cli: &Cli, config: &PackConfig) -> Result<PackRequest> {
    let image = ImageRef::parse(&cli.image)?;
    let appname = cli.appname.clone().unwrap_or_else(|| config.appname.clone());
    let mut request = PackRequest::new(image, appname);

    request.command = CommandLine::Args(cli.command.clone());
    request.entrypoint = cli.entrypoint.clone();
    request.prerun = cli.prerun.clone();
    request.postrun = cli.postrun.clone();
    request.native_unzip = cli.native_unzip;
    request.force_reimport = cli.force_reimport;
    request.disable_automatic_checkpoints = !cli.enable_checkpoints;
    request.progress_file = cli.progress_file.clone();

    request.memory_bound = match (cli.rsc_memory_bound, cli.memory) {
        (Some(bytes), Some(_)) => {
            warn!("Both --memory and --rsc-memory-bound given, using --rsc-memory-bound");
            Some(bytes)
        }
        (Some(bytes), None) => Some(bytes),
        (None, Some(mb)) => Some(memory_from_deprecated_mb(mb)),
        (None, None) => None,
    };
    request.disk_bound = cli.rsc_disk_bound;

    for spec in &cli.input {
        let (open_name, path, flags) = parse_input_spec(spec)?;
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::InvalidInput(format!("cannot read input '{}': {}", path, e)))?;
        request
            .inputs
            .push(InputFile::inline(open_name, bytes).with_flags(flags));
    }

    for opt in &cli.wu_opt {
        let (key, value) = parse_key_value(opt)?;
        if RESERVED_WU_OPTS.contains(&key.as_str()) {
            return Err(Error::InvalidInput(format!(
                "'{}' is set by wupack and cannot be passed with --wu-opt",
                key
            )));
        }
        request.scheduler_options.push((key, value));
    }

    for opt in &cli.vbox_opt {
        request.vbox_options.push(parse_vbox_opt(opt)?);
    }

    Ok(request)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handling available: never cancel.
        std::future::pending::<()>().await;
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = PackConfig::load_or_default(cli.config.as_deref())?;
    if let Some(project_dir) = &cli.project_dir {
        config.project_dir = project_dir.clone();
    }

    let runtime = Arc::new(DockerCli::with_binary(&config.docker_binary));

    if cli.inspect {
        let image = ImageRef::parse(&cli.image)?;
        let report = inspect_image(runtime, &image).await?;
        println!("image:        {}", image);
        println!("id:           {}", report.identity.content_id);
        println!("size:         {} bytes (reported)", report.identity.size_bytes);
        println!("exact size:   {} bytes", report.exact_size);
        println!("memory bound: {} bytes", report.bounds.memory_bytes);
        println!("disk bound:   {} bytes", report.bounds.disk_bytes);
        return Ok(());
    }

    let request = build_request(&cli, &config)?;
    let submitter = Arc::new(
        CreateWorkCli::new(&config.project_dir).with_binary(config.create_work_binary()),
    );
    let store = DownloadHierarchy::with_fanout(config.download_dir(), config.fanout)?;
    let packager = Packager::new(runtime, submitter, store);

    info!("Packaging '{}' for app '{}'", request.image, request.appname);
    let submission = packager.run_until(&request, shutdown_signal()).await?;
    println!("{}", submission.wu_name);
    Ok(())
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
