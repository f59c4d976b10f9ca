use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use log::info;

use ytresume::config::{
    self, DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_TYPE, DEFAULT_DIRECT_UPLOAD_LIMIT, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_PARTS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_UPLOAD_ENDPOINT,
};
use ytresume::pipeline::display_name;
use ytresume::{
    upload_files, CancellationToken, CommandToken, CredentialProvider, EnvToken, FileReport,
    MediaDescriptor, Privacy, ProgressReporter, ReqwestTransport, StreamSource, UploadConfig,
    UploadJob, UploadResult, Uploader,
};

/// ytresume: resumable video uploads to YouTube.
#[derive(Parser)]
#[command(name = "ytresume", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload one or more videos, each in its own resumable session
    Upload {
        /// Video files to upload ("-" reads a single video from stdin)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Video title (default: the file name)
        #[arg(short, long)]
        title: Option<String>,

        /// Video description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Keyword tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Visibility: public, unlisted or private
        #[arg(short, long, default_value = "private")]
        privacy: Privacy,

        /// Category ID (e.g. 22 for People & Blogs)
        #[arg(long)]
        category: Option<String>,

        /// MIME type of the video payload
        #[arg(long, default_value = DEFAULT_CONTENT_TYPE)]
        content_type: String,

        /// Command that prints an access token (default: read $YOUTUBE_ACCESS_TOKEN)
        #[arg(long)]
        token_command: Option<String>,

        /// Environment variable holding the access token
        #[arg(long, default_value = ytresume::auth::TOKEN_ENV_VAR)]
        token_env: String,

        /// Chunk size in bytes, rounded down to a multiple of 256 KiB (default: 2097152)
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        /// Send each video in a single request instead of resumable chunks
        #[arg(long)]
        direct: bool,

        /// Largest payload allowed in direct mode, in bytes (default: 5242880)
        #[arg(long, default_value_t = DEFAULT_DIRECT_UPLOAD_LIMIT)]
        direct_limit: u64,

        /// Attempts per byte offset before giving up (default: 5)
        #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS)]
        max_attempts: u32,

        /// Timeout for each network call, in seconds (default: 120)
        #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
        timeout: u64,

        /// Upload endpoint
        #[arg(long, default_value = DEFAULT_UPLOAD_ENDPOINT)]
        endpoint: String,

        /// Resource parts to request back
        #[arg(long, default_value = DEFAULT_PARTS)]
        parts: String,

        /// Cancel the remaining uploads after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Do not draw progress bars
        #[arg(long)]
        no_progress: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Upload {
            files,
            title,
            description,
            tags,
            privacy,
            category,
            content_type,
            token_command,
            token_env,
            chunk_size,
            direct,
            direct_limit,
            max_attempts,
            timeout,
            endpoint,
            parts,
            fail_fast,
            no_progress,
        } => {
            if mixes_stdin(&files) {
                Cli::command()
                    .error(
                        ErrorKind::ArgumentConflict,
                        "\"-\" (stdin) cannot be combined with other files",
                    )
                    .exit();
            }

            let cfg = UploadConfig {
                endpoint,
                parts,
                chunk_size: config::align_chunk_size(chunk_size),
                direct,
                direct_upload_limit: direct_limit,
                max_attempts,
                request_timeout: Duration::from_secs(timeout),
                ..Default::default()
            };

            let credentials: Box<dyn CredentialProvider> = match token_command {
                Some(line) => Box::new(CommandToken::from_command_line(&line)?),
                None => Box::new(EnvToken::new(token_env)),
            };
            let transport = ReqwestTransport::new(cfg.request_timeout)
                .context("failed to build HTTP client")?;
            let uploader = Uploader::new(transport, credentials, cfg)?;

            let template = MediaDescriptor {
                title: title.clone().unwrap_or_default(),
                description,
                tags,
                privacy,
                category_id: category,
                content_type,
            };

            let jobs: Vec<UploadJob> = files
                .into_iter()
                .map(|path| {
                    let mut descriptor = template.clone();
                    if title.is_none() {
                        descriptor.title = display_name(&path);
                    }
                    UploadJob { path, descriptor }
                })
                .collect();

            let labels: Vec<String> = jobs.iter().map(|j| display_name(&j.path)).collect();
            let reporter = if no_progress {
                ProgressReporter::hidden(&labels)
            } else {
                ProgressReporter::spawn(&labels)
            };
            let cancel = CancellationToken::new();

            if jobs.len() == 1 && is_stdin(&jobs[0].path) {
                let mut descriptor = jobs[0].descriptor.clone();
                if title.is_none() {
                    descriptor.title = "Upload from stdin".to_string();
                }
                info!("uploading stdin as \"{}\"", descriptor.title);
                let source = StreamSource::new(io::stdin().lock());
                let outcome = uploader.upload(&descriptor, source, &reporter.observer(0), &cancel);
                reporter.finish();
                print_result(&outcome?);
                return Ok(());
            }

            info!("uploading {} file(s)", jobs.len());
            let reports = upload_files(&uploader, jobs, &reporter, &cancel, fail_fast);
            reporter.finish();

            let failed = summarize(&reports);
            if failed > 0 {
                bail!("{} of {} uploads failed", failed, reports.len());
            }
        }
    }

    Ok(())
}

fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Stdin can only be uploaded on its own.
fn mixes_stdin(files: &[PathBuf]) -> bool {
    files.len() > 1 && files.iter().any(|p| is_stdin(p))
}

fn print_result(result: &UploadResult) {
    let snippet = result.video.snippet.clone().unwrap_or_default();
    let status = result.video.status.clone().unwrap_or_default();
    let statistics = result.video.statistics.clone().unwrap_or_default();
    println!("  - Id: {}", result.id);
    println!("  - Title: {}", snippet.title);
    println!("  - Tags: {}", snippet.tags.join(", "));
    println!(
        "  - Privacy Status: {}",
        status.privacy_status.as_deref().unwrap_or("unknown")
    );
    println!(
        "  - View Count: {}",
        statistics.view_count.as_deref().unwrap_or("0")
    );
    println!("  - Bytes: {}", result.bytes);
}

/// Print one block per file; returns how many failed.
fn summarize(reports: &[FileReport]) -> usize {
    let mut failed = 0;
    for report in reports {
        println!("\n{}", report.path.display());
        if let Some(sha) = &report.sha256 {
            println!("  - SHA-256: {}", sha);
        }
        match &report.outcome {
            Ok(result) => print_result(result),
            Err(e) => {
                failed += 1;
                eprintln!("  ! {}", e);
                if let Some(acked) = e.acknowledged() {
                    eprintln!("  ! server held {} bytes when the upload stopped", acked);
                }
            }
        }
    }
    failed
}
