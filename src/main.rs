use clap::{ArgAction, Parser};
use doxconv::config::{self, ConverterConfig};
use doxconv::convert::{ConvertError, ConvertOptions, Converter, InputSpec, OutputSpec};
use doxconv::format::{Format, FormatRequest};
use doxconv::command::SystemRunner;
use doxconv::output;
use doxconv::plugins::BuiltinRegistry;
use doxconv::postprocess::PostProcess;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

fn supported_formats() -> String {
    output::format_supported_formats().join("\n")
}

#[derive(Parser)]
#[command(name = "doxconv")]
#[command(about = "Convert documents between markup formats")]
#[command(long_about = "\
Convert documents between markup formats

The input is a single file or a directory. Directories are converted file by
file, mirroring their layout under the output directory. With --from auto the
format of a file is detected from its root XML element or its extension, and
with --input-encoding auto the encoding from its XML declaration or content.

Examples:

  doxconv -i index.apt -o index.md --to markdown
  doxconv -i src/site/apt -o src/site/markdown --from apt --to markdown --vcs-mv
  doxconv -i page.html -o out/ --to xdoc -f

Run 'doxconv --gen-config' to print a documented doxconv.toml.")]
#[command(version = version_string(), disable_version_flag = true)]
#[command(after_help = supported_formats())]
struct Cli {
    /// Input file or directory
    #[arg(short, long, required_unless_present = "gen_config")]
    input: Option<PathBuf>,

    /// Output file or directory
    #[arg(short, long, required_unless_present = "gen_config")]
    output: Option<PathBuf>,

    /// Input format, or 'auto' to detect it per file
    #[arg(long, default_value = "auto")]
    from: FormatRequest,

    /// Output format
    #[arg(long, required_unless_present = "gen_config")]
    to: Option<Format>,

    /// Input encoding, or 'auto' to detect it
    #[arg(long, default_value = "auto")]
    input_encoding: String,

    /// Output encoding, or 'auto' to keep the input's
    #[arg(long, default_value = "auto")]
    output_encoding: String,

    /// Re-indent XML output
    #[arg(short = 'f', long = "format")]
    pretty: bool,

    /// Delete each source file after it was converted
    #[arg(long)]
    remove_in: bool,

    /// Move sources onto their outputs with 'git mv' and commit, keeping history
    #[arg(long)]
    vcs_mv: bool,

    /// Keep Velocity comments, directives and references unescaped
    #[arg(long)]
    preserve_velocity: bool,

    /// Configuration file (default: ./doxconv.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'X', long)]
    debug: bool,

    /// Show the full error chain on failure
    #[arg(short, long)]
    errors: bool,

    /// Print a stock doxconv.toml with all options documented
    #[arg(long)]
    gen_config: bool,

    /// Print version
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let output_may_exist = err
                .downcast_ref::<ConvertError>()
                .is_some_and(ConvertError::output_may_exist);
            output::print_error(err.as_ref(), cli.errors || cli.debug, output_may_exist);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    if cli.gen_config {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let options = options_from_cli(cli, &config)?;

    let (Some(input), Some(target), Some(to)) = (&cli.input, &cli.output, cli.to) else {
        return Err(ConvertError::Configuration("--input, --output and --to are required".into()).into());
    };
    let input_spec = InputSpec::new(input, cli.from, &cli.input_encoding)?;
    let output_spec = OutputSpec::new(target, to, &cli.output_encoding)?;

    let registry = BuiltinRegistry::new();
    let runner = SystemRunner;
    let report = Converter::new(&registry, &runner, options).convert(&input_spec, &output_spec)?;
    output::print_report(&report, input);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ConverterConfig, config::ConfigError> {
    match path {
        Some(path) => config::load_config_file(path),
        None => config::load_config(Path::new(".")),
    }
}

/// Config values, overridden by whatever the command line switched on.
fn options_from_cli(cli: &Cli, config: &ConverterConfig) -> Result<ConvertOptions, ConvertError> {
    let mut options = ConvertOptions::from_config(config);
    options.pretty |= cli.pretty;
    options.preserve_velocity |= cli.preserve_velocity;
    options.post_process = PostProcess::from_flags(cli.remove_in, cli.vcs_mv)
        .map_err(|e| ConvertError::Configuration(e.to_string()))?;
    Ok(options)
}
