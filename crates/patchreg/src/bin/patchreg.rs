//! patchreg CLI: register a moving image onto a reference image.

use clap::Parser;
use patchreg::{run_job, AlignJobConfig};
use std::path::PathBuf;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "patchreg")]
#[command(about = "Register a moving (e.g. NIR) image onto a reference (e.g. VIS) image")]
#[command(version)]
struct Cli {
    /// JSON job configuration.
    #[arg(long)]
    config: PathBuf,

    /// Override the reference image path.
    #[arg(long)]
    reference: Option<String>,

    /// Override the moving image path.
    #[arg(long)]
    moving: Option<String>,

    /// Where to write the warped moving image.
    #[arg(long)]
    output: Option<String>,

    /// Where to write the JSON report.
    #[arg(long)]
    report: Option<String>,

    /// Write cost-surface mosaics and warped images of every iteration here.
    #[arg(long)]
    debug_dir: Option<String>,

    /// Log verbosity: -v info, -vv debug, -vvv trace. `RUST_LOG` overrides
    /// it under the `tracing` feature.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON log lines (requires the `tracing` feature).
    #[cfg(feature = "tracing")]
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn job(&self) -> CliResult<AlignJobConfig> {
        let mut job = AlignJobConfig::load_json(&self.config)?;
        if let Some(p) = &self.reference {
            job.reference_path = p.clone();
        }
        if let Some(p) = &self.moving {
            job.moving_path = p.clone();
        }
        if self.output.is_some() {
            job.output_path = self.output.clone();
        }
        if self.report.is_some() {
            job.report_path = self.report.clone();
        }
        if self.debug_dir.is_some() {
            job.debug_dir = self.debug_dir.clone();
        }
        Ok(job)
    }
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) -> CliResult<()> {
    let level = patchreg::core::level_from_verbosity(cli.verbose);
    patchreg::core::init_tracing(cli.json_logs, level)?;
    Ok(())
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) -> CliResult<()> {
    patchreg::core::install_stderr_logger(patchreg::core::level_from_verbosity(cli.verbose))?;
    Ok(())
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let job = cli.job()?;
    let report = run_job(&job)?;

    let h = report.homography;
    println!(
        "homography: [[{:.6}, {:.6}, {:.3}], [{:.6}, {:.6}, {:.3}], [{:.3e}, {:.3e}, 1]]",
        h[0][0], h[0][1], h[0][2], h[1][0], h[1][1], h[1][2], h[2][0], h[2][1]
    );
    println!("report: {}", job.report_path().display());
    Ok(())
}
