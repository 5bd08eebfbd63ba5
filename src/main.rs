use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use pdf_minify::config::{PDF_CONTENT_TYPE, PDF_MAGIC};
use pdf_minify::{
    CompressionSession, LopdfEngine, ObjectFetcher, ObjectRegistry, RawFile, SessionUpdate,
    StateKind,
};

/// Compress a PDF by shrinking its images
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Input PDF file
    input: PathBuf,

    /// Output PDF file (defaults to <input>-min.pdf next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn content_type_of(path: &Path, bytes: &[u8]) -> &'static str {
    let has_pdf_extension = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    if bytes.starts_with(PDF_MAGIC) || has_pdf_extension {
        PDF_CONTENT_TYPE
    } else {
        "application/octet-stream"
    }
}

async fn run(args: Args) -> Result<()> {
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("failed to read {:?}", args.input))?;
    let name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{:?} has no file name", args.input))?;
    let original_size = bytes.len();
    let content_type = content_type_of(&args.input, &bytes);

    let registry = ObjectRegistry::new();
    let mut session = CompressionSession::new(
        registry.clone(),
        LopdfEngine::new(registry.clone()),
        ObjectFetcher::new(registry.clone()),
    );

    session.select(RawFile::new(name, content_type, bytes))?;
    println!("Compressing {:?}", args.input);
    session.start()?;

    while session.kind() == StateKind::Compressing {
        match session.next_update().await {
            Some(SessionUpdate::Progress { data, .. }) if data.len() == 2 => {
                log::info!("image {} of {}", data[0], data[1]);
            }
            Some(_) => {}
            None => break,
        }
    }

    let download = session.download().ok_or_else(|| {
        anyhow!(
            "compression failed: {}",
            session.error_message().unwrap_or("unknown error")
        )
    })?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.input.with_file_name(download.suggested_name));
    let blob = registry
        .resolve(download.local_ref)
        .ok_or_else(|| anyhow!("{} was revoked", download.local_ref))?;
    tokio::fs::write(&output, &blob.bytes)
        .await
        .with_context(|| format!("failed to write {:?}", output))?;

    println!("Saved {:?}", output);
    println!("Original size: {:.2} MB", original_size as f64 / 1_048_576.0);
    println!("New size:      {:.2} MB", blob.bytes.len() as f64 / 1_048_576.0);

    session.remove();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
