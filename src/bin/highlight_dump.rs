use anyhow::{Context, Result};
use clap::Parser;
use marginalia::highlights::{ScanSettings, parse_document};
use marginalia::model::HighlightRecord;
use marginalia::{file_mtime_ms, path_key};
use serde::Serialize;
use std::path::Path;

#[derive(Parser)]
#[command(name = "highlight_dump")]
#[command(about = "Print the highlights and comments found in a document")]
struct Cli {
    file: String,
    #[arg(short, long)]
    pretty: bool,
    #[arg(long, default_value_t = marginalia::highlights::reconcile::DEFAULT_FUZZY_WINDOW)]
    fuzzy_window: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Dump {
    file_path: String,
    highlights: usize,
    comments: usize,
    records: Vec<HighlightRecord>,
}

fn dump(path: &Path, settings: &ScanSettings) -> Result<Dump> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let file_path = path_key(path);
    let parsed = parse_document(&file_path, &text, file_mtime_ms(path), &[], settings);
    let comments = parsed.records.iter().filter(|r| r.is_native_comment).count();

    Ok(Dump {
        highlights: parsed.records.len() - comments,
        comments,
        file_path,
        records: parsed.records,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = Path::new(&cli.file);

    if !path.exists() {
        anyhow::bail!("File does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("Path is not a file: {}", path.display());
    }

    let settings = ScanSettings {
        fuzzy_window: cli.fuzzy_window,
    };
    let output = dump(path, &settings)?;

    if cli.pretty {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{}", serde_json::to_string(&output)?);
    }

    Ok(())
}
