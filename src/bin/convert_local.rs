/// Convert files from disk through the same pipeline as `POST /convert`
///
/// Usage: cargo run --release --bin convert_local -- --to webp [--out dir]
///        [--quality 80] [--width 800] [--rotate_deg 90] [--bg "#000"] ... <files>...
///
/// Any `--<field> <value>` pair is passed through as the form field of the
/// same name, so flags accept exactly what the HTTP form accepts.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use image_tool_server::api::ConvertForm;
use image_tool_server::core::types::UploadedFile;
use image_tool_server::{Config, ConversionOrchestrator, Metrics};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("image_tool_server=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} --to <format> [--out dir] [--<field> value]... <files>...", args[0]);
        std::process::exit(1);
    }

    let mut output_dir = PathBuf::from(".");
    let mut fields = HashMap::new();
    let mut inputs = Vec::new();

    let mut i = 1;
    while i < args.len() {
        let arg = &args[i];
        match arg.strip_prefix("--") {
            Some("out") | Some("output") => {
                let Some(dir) = args.get(i + 1) else {
                    bail!("--out needs a directory");
                };
                output_dir = PathBuf::from(dir);
                i += 2;
            }
            Some(name) => {
                let Some(value) = args.get(i + 1) else {
                    bail!("--{} needs a value", name);
                };
                fields.insert(name.to_string(), value.clone());
                i += 2;
            }
            None => {
                inputs.push(PathBuf::from(arg));
                i += 1;
            }
        }
    }

    let mut files = Vec::with_capacity(inputs.len());
    for path in &inputs {
        let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!("Loaded {} ({} bytes)", filename, data.len());
        files.push(UploadedFile::new(filename, data));
    }

    let (files, request) = ConvertForm { files, fields }.into_request()?;

    let config = Config::new().context("Failed to load configuration")?;
    let orchestrator = ConversionOrchestrator::new(&config, Metrics::new());

    let bundle = orchestrator.process_batch(files, &request).await.map_err(|e| {
        if let image_tool_server::BatchError::AllFailed(failures) = &e {
            for failure in failures {
                eprintln!("  ✗ {}", failure);
            }
        }
        anyhow::anyhow!(e)
    })?;

    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    let target = output_dir.join(Path::new(bundle.filename()).file_name().unwrap_or_default());
    let output = bundle.into_output();
    std::fs::write(&target, &output.data).with_context(|| format!("Failed to write {}", target.display()))?;

    println!("✓ Wrote {} ({} bytes)", target.display(), output.data.len());
    Ok(())
}
