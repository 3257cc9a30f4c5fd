use clap::{Parser, Subcommand, builder::styling};
use etl_transforms::JobConfig;
use eyre::Result;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// ETL transforms: join, compare and consolidate NDJSON row sources
#[derive(Parser)]
#[command(name = "etlx", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source settings from, if it exists
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job file and write its output
    Run {
        /// The YAML job file
        job: PathBuf,

        /// Stop after this many output rows
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Validate a job file and print its output columns
    Check {
        /// The YAML job file
        job: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if Path::new(&cli.env).exists() {
        dotenvy::from_filename(&cli.env)?;
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    match cli.command {
        Commands::Run { job, limit } => {
            log::info!("Running job {}", job.display().bright_black());
            let config = JobConfig::read(&job)?;
            let count = config.run(limit).await?;
            log::info!(
                "✓ Wrote {} row(s) to {}",
                count.cyan(),
                config.output_path().display().bright_black()
            );
        }
        Commands::Check { job } => {
            log::info!("Checking job {}", job.display().bright_black());
            let config = JobConfig::read(&job)?;
            let mut processor = config.processor()?;
            let columns = processor.schema().names().join(", ");
            processor.close();
            log::info!(
                "✓ {} produces columns: {}",
                config.component().to_string().cyan(),
                columns
            );
        }
    }

    Ok(())
}
