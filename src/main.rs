use std::{fs, path::PathBuf, process};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::debug;
use shotter::{
    archive::export_archive,
    browser_controller::{ChromeLauncher, ControllerOptions},
    content_filter::HttpListFetcher,
    run_log::RunLog,
    runner::{Runner, RunnerOptions},
    types::{BatchRequest, ImageFormat, ShotError},
    utils::{split_url_list, ARCHIVE_PATH, OUTPUT_DIR, RUN_LOG_PATH},
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Batch screenshot capture CLI", long_about = None)]
struct Args {
    /// Where the run log is kept between batches
    #[arg(long, global = true, default_value = RUN_LOG_PATH)]
    run_log: PathBuf,
    /// Root of the per-device screenshot folders
    #[arg(short = 'o', long, global = true, default_value = OUTPUT_DIR)]
    output_dir: PathBuf,
    /// Where the zip export is written
    #[arg(short = 'a', long, global = true, default_value = ARCHIVE_PATH)]
    archive: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Capture every url on desktop, tablet and mobile
    Capture {
        /// Urls to capture, separated by spaces, commas or backslashes
        urls: Vec<String>,
        /// Read additional urls from a file
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,
        /// Image format (jpeg, png or webp)
        #[arg(long, default_value_t = ImageFormat::Jpeg)]
        format: ImageFormat,
        /// Pause in milliseconds after switching device, at most 10000
        #[arg(short = 's', long, default_value_t = 0)]
        settle_ms: u64,
        /// Forget previously recorded failures before starting
        #[arg(short = 'r', long)]
        reset_errors: bool,
        /// Print the results as json, images base64 encoded
        #[arg(long)]
        json: bool,
    },
    /// Zip the output directory
    Export,
    /// Print the run log
    Log,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    match std::env::var("RUST_LOG") {
        Ok(env) => {
            if env == "debug" {
                println!("{number:/>width$}", number = "", width = 20);
                println!("{}", "Debug mode enabled");
                println!("{number:/>width$}", number = "", width = 20);
                println!();
            }
        }
        _ => {}
    }

    debug!("Starting with {:#?}", args.clone());

    match args.command.clone() {
        Command::Capture {
            urls,
            file,
            format,
            settle_ms,
            reset_errors,
            json,
        } => {
            let mut list = urls
                .iter()
                .flat_map(|u| split_url_list(u))
                .collect::<Vec<String>>();
            if let Some(file) = file {
                let text = fs::read_to_string(&file)
                    .context(format!("could not read url file {:?}", file))?;
                list.extend(split_url_list(&text));
            }
            let request = BatchRequest::new(list, format, settle_ms, reset_errors)?;

            let options = RunnerOptions::default_builder()
                .output_dir(args.output_dir.clone())
                .archive_path(args.archive.clone())
                .run_log_path(args.run_log.clone())
                .build()?;
            let controller_options = ControllerOptions::default_builder().build()?;

            // headless_chrome and the blocking http client both block
            let results = tokio::task::spawn_blocking(move || {
                let fetcher = HttpListFetcher::new()?;
                let mut runner = Runner::new(
                    options,
                    ChromeLauncher::new(controller_options),
                    Box::new(fetcher),
                )?;
                runner.run(&request)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                for r in &results {
                    println!(
                        "{:>5} {:>3} {} ({} images)",
                        r.index,
                        r.status,
                        r.url,
                        r.images.len()
                    );
                }
            }
        }
        Command::Export => match export_archive(&args.output_dir, &args.archive) {
            Ok(bytes) => println!("wrote {:?} ({} bytes)", args.archive, bytes.len()),
            Err(e) => {
                if let Some(ShotError::ArchiveSourceMissing(dir)) = e.downcast_ref::<ShotError>() {
                    eprintln!("nothing to export, {:?} does not exist", dir);
                    process::exit(2);
                }
                return Err(e);
            }
        },
        Command::Log => match RunLog::load(&args.run_log)? {
            Some(log) => println!("{}", serde_json::to_string_pretty(log.record())?),
            None => eprintln!("no run log at {:?} yet", args.run_log),
        },
    }

    Ok(())
}
