use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use hcp2bids::app::App;
use hcp2bids::config::{ConfigLoader, ConvertOverrides};
use hcp2bids::dataset::GeneratedBy;
use hcp2bids::diagnostics::DiagnosticLog;
use hcp2bids::domain::{DatasetFamily, PhaseEncodingDirection, TransferMethod};
use hcp2bids::error::ConvertError;
use hcp2bids::output::{JsonOutput, OutputMode, TextOutput};

#[derive(Parser)]
#[command(name = "hcp2bids")]
#[command(about = "Convert HCP raw exports (Young Adult, Aging, Development) into BIDS")]
#[command(version, author)]
struct Cli {
    /// Print the conversion result as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Log skipped candidates and other debug decisions.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert an HCP Lifespan (Aging/Development) NDA download")]
    Lifespan {
        #[arg(long)]
        nda_dir: Utf8PathBuf,

        #[command(flatten)]
        convert: ConvertArgs,
    },
    #[command(about = "Convert an HCP Young Adult download")]
    YoungAdult {
        #[arg(long)]
        hcp_dir: Utf8PathBuf,

        /// Take functional and diffusion images from the gradunwarp outputs.
        #[arg(long)]
        grad_unwarp: bool,

        #[command(flatten)]
        convert: ConvertArgs,
    },
    #[command(about = "Convert subject folders matched by a glob pattern")]
    Convert {
        #[arg(long)]
        subjects: String,

        #[command(flatten)]
        convert: ConvertArgs,
    },
}

#[derive(Args, Clone)]
struct ConvertArgs {
    #[arg(long)]
    output_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    config: Option<String>,

    /// Report every decision without touching the filesystem.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    overwrite: bool,

    /// Fail instead of skipping when an output image already exists.
    #[arg(long)]
    strict: bool,

    #[arg(long, value_enum)]
    method: Option<TransferMethod>,

    #[arg(long)]
    use_bids_uris: bool,

    #[arg(long, value_delimiter = ',')]
    pe_dirs: Option<Vec<String>>,

    /// Order field-map runs by name instead of acquisition time.
    #[arg(long)]
    sort_by_name: bool,

    #[arg(long)]
    t1w_use_derived: bool,

    #[arg(long)]
    t2w_use_derived: bool,

    /// Directory of template sidecars used instead of the ones next to each image.
    #[arg(long)]
    sidecar_dir: Option<Utf8PathBuf>,

    /// Convert bias-field images instead of skipping them.
    #[arg(long)]
    keep_bias: bool,

    /// Skip every image whose path contains this text (repeatable).
    #[arg(long)]
    skip: Vec<String>,

    /// Dataset name; `auto` derives it from the subject ids.
    #[arg(long)]
    name: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ConvertError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ConvertError) -> u8 {
    match error {
        ConvertError::ConfigRead(_)
        | ConvertError::ConfigParse(_)
        | ConvertError::MissingOption(_)
        | ConvertError::InvalidPattern { .. }
        | ConvertError::InvalidDirection(_) => 2,
        ConvertError::DestinationExists(_)
        | ConvertError::MissingDerivedFile(_)
        | ConvertError::AcquisitionTime { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let (family, pattern, grad_unwarp, args) = match cli.command {
        Commands::Lifespan { nda_dir, convert } => (
            Some(DatasetFamily::Lifespan),
            DatasetFamily::Lifespan.subject_pattern(nda_dir.as_str()),
            false,
            convert,
        ),
        Commands::YoungAdult {
            hcp_dir,
            grad_unwarp,
            convert,
        } => (
            Some(DatasetFamily::YoungAdult),
            DatasetFamily::YoungAdult.subject_pattern(hcp_dir.as_str()),
            grad_unwarp,
            convert,
        ),
        Commands::Convert { subjects, convert } => (None, subjects, false, convert),
    };

    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let pe_dirs = args
        .pe_dirs
        .map(|codes| {
            codes
                .iter()
                .map(|code| code.parse::<PhaseEncodingDirection>())
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;
    let overrides = ConvertOverrides {
        output_dir: args.output_dir,
        dry_run: args.dry_run,
        overwrite: args.overwrite,
        strict: args.strict,
        method: args.method,
        use_bids_uris: args.use_bids_uris,
        pe_dirs,
        sort_by_name: args.sort_by_name,
        grad_unwarp,
        t1w_use_derived: args.t1w_use_derived,
        t2w_use_derived: args.t2w_use_derived,
        keep_bias: args.keep_bias,
        skip: args.skip,
        sidecar_dir: args.sidecar_dir,
        name: args.name,
    };
    let generated_by = GeneratedBy::new(
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_REPOSITORY"),
    );
    let options = ConfigLoader::resolve_options(family, config, overrides, generated_by)?;

    let log = DiagnosticLog::new();
    let app = App::new(options);
    let result = app.convert(&pattern, &log)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_convert(&result, log.warnings()).into_diagnostic()?,
        OutputMode::Text => TextOutput::print_convert(&result, &log.warnings()).into_diagnostic()?,
    }
    Ok(())
}
