use std::{
    io,
    path::{Path, PathBuf},
    process,
};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre as ey;
use ey::eyre::Context;
use geopack_content::{
    config::PipelineConfig,
    lod_replicator::{replicate_lods, DEFAULT_LOD_COPIES},
    pipeline::Pipeline,
    reconciler::flatten_geometry,
    tag_stripper::strip_shape_tags,
};
use geopack_shared::log::{self, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Upgrades visual assets and their geometry to the new packer", long_about = None)]
struct CommandLineArguments {
    /// Most detailed level of the messages that are printed
    #[arg(long, value_enum, default_value = "info", global = true)]
    log_level: LogLevel,

    /// File to which the messages are written in addition to the console
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs the complete pipeline
    Run {
        /// Directory that contains the source, temporary and output directories and the packers
        #[arg(short, long, default_value = ".")]
        base_dir: PathBuf,

        /// Configuration file. Defaults to geopack.yaml in the base directory if it exists
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Removes the Shape suffix from the node names of all visual files
    StripTags {
        /// Directory that is searched recursively
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Generates the LOD variants of all visual files into <input>/lods
    ReplicateLods {
        /// Directory that is searched recursively
        #[arg(short, long)]
        input: PathBuf,

        /// Number of variants per file
        #[arg(short, long, default_value_t = DEFAULT_LOD_COPIES)]
        copies: u32,
    },
    /// Moves all geometry files into the given directory and removes its subdirectories
    Flatten {
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

fn setup_logging(level: log::LevelFilter, log_file: Option<&Path>) -> ey::Result<()> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                geopack_shared::chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(io::stdout());
    if let Some(log_file) = log_file {
        let file = fern::log_file(log_file).wrap_err_with(|| format!("Failed to open log file {}", log_file.display()))?;
        dispatch = dispatch.chain(file);
    }
    dispatch.apply().map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    Ok(())
}

fn main() -> ey::Result<()> {
    ey::install()?;
    let command_line_arguments = CommandLineArguments::parse();
    setup_logging(command_line_arguments.log_level.into(), command_line_arguments.log_file.as_deref())?;

    // An interrupted run ends without error and without cleaning up.
    ctrlc::set_handler(|| {
        info!("Interrupted by the user");
        process::exit(0);
    })
    .wrap_err("Failed to install the interrupt handler")?;

    match command_line_arguments.command {
        Command::Run { base_dir, config } => {
            let config = PipelineConfig::load(base_dir, config.as_deref()).wrap_err("Failed to load the configuration")?;
            let report = Pipeline::new(config).run().wrap_err("Pipeline failed")?;
            info! {
                "Summary: {} tags stripped, {} LOD variants, {} geometry files, {} visual files",
                report.stripped_tags.rewritten, report.lods.generated, report.flattened.moved, report.copied.copied
            }
        }
        Command::StripTags { input } => {
            let report = strip_shape_tags(&input).wrap_err("Failed to strip the shape suffixes")?;
            info!("Processed {} files ({} failed)", report.visited, report.failed);
        }
        Command::ReplicateLods { input, copies } => {
            let lod_root = input.join(PipelineConfig::default().lod_dir_name);
            let report = replicate_lods(&input, &lod_root, copies).wrap_err("Failed to generate the LOD variants")?;
            info!("Generated {} LOD files in '{}'", report.generated, lod_root.display());
        }
        Command::Flatten { input } => {
            let report = flatten_geometry(&input).wrap_err("Failed to move the geometry files")?;
            info!("Moved {} geometry files", report.moved);
        }
    }
    Ok(())
}
