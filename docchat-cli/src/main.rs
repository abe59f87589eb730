//! `docchat` command-line launcher.

mod repl;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use docchat_rag::{Answer, RagConfig, RagConfigBuilder, RagPipeline, Upload};
use docchat_server::ServerConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docchat", version, about = "Chat with your images, PDFs and zip archives")]
struct Cli {
    /// Directory holding persisted collections and kept uploads
    #[arg(long, global = true, env = "DOCCHAT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Collection to ingest into and query
    #[arg(long, global = true, env = "DOCCHAT_COLLECTION")]
    collection: Option<String>,

    /// Maximum chunk length in characters
    #[arg(long, global = true, env = "DOCCHAT_CHUNK_SIZE")]
    chunk_size: Option<usize>,

    /// Characters shared between consecutive chunks
    #[arg(long, global = true, env = "DOCCHAT_CHUNK_OVERLAP")]
    chunk_overlap: Option<usize>,

    /// Number of chunks handed to the model
    #[arg(long, global = true, env = "DOCCHAT_TOP_K")]
    top_k: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, chunk and index files (directories are read one level deep)
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Ask a single question and print the answer with its sources
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Interactive chat over the collection
    Chat,
    /// Serve the HTTP upload and chat API
    Serve {
        #[arg(long, env = "DOCCHAT_HOST", default_value = "127.0.0.1")]
        host: String,
        #[arg(long, env = "DOCCHAT_PORT", default_value_t = 8090)]
        port: u16,
    },
    /// List persisted collections
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = resolve_config(&cli)?;
    let pipeline = Arc::new(RagPipeline::from_config(config)?);

    match cli.command {
        Commands::Ingest { paths } => ingest(&pipeline, &paths).await,
        Commands::Ask { question } => {
            let answer = pipeline.query(&question.join(" ")).await?;
            print_answer(&answer);
            Ok(())
        }
        Commands::Chat => repl::run(&pipeline).await,
        Commands::Serve { host, port } => {
            let server = ServerConfig { host, port, ..ServerConfig::from_env()? };
            docchat_server::run_server(server, pipeline).await
        }
        Commands::Info => info(&pipeline).await,
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<RagConfig> {
    let mut builder = RagConfigBuilder::from_config(RagConfig::from_env()?);
    if let Some(dir) = &cli.data_dir {
        builder = builder.data_dir(dir);
    }
    if let Some(name) = &cli.collection {
        builder = builder.collection(name);
    }
    if let Some(size) = cli.chunk_size {
        builder = builder.chunk_size(size);
    }
    if let Some(overlap) = cli.chunk_overlap {
        builder = builder.chunk_overlap(overlap);
    }
    if let Some(k) = cli.top_k {
        builder = builder.top_k(k);
    }
    Ok(builder.build()?)
}

async fn ingest(pipeline: &RagPipeline, paths: &[PathBuf]) -> anyhow::Result<()> {
    let files = expand_paths(paths)?;
    if files.is_empty() {
        anyhow::bail!("no files to ingest");
    }

    let mut total = 0;
    for path in files {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let report = pipeline.ingest(Upload::new(&name, bytes)).await?;
        for file in &report.files {
            println!("{}: {}", file.source_id, file.status);
        }
        total += report.chunk_ids.len();
    }
    println!("{} chunks added to '{}'", total, pipeline.config().collection);
    Ok(())
}

/// Files named directly plus the regular files inside named directories,
/// sorted within each directory.
fn expand_paths(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut inner = read_dir_files(path)?;
            inner.sort();
            files.extend(inner);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn read_dir_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

pub(crate) fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if answer.sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, source) in answer.sources.iter().enumerate() {
        println!(
            "  [{}] {}#{} (score {:.3})",
            i + 1,
            source.chunk.source_id,
            source.chunk.chunk_index,
            source.score
        );
    }
}

async fn info(pipeline: &RagPipeline) -> anyhow::Result<()> {
    let config = pipeline.config();
    println!("data dir:   {}", config.data_dir.display());
    println!("collection: {}", config.collection);
    println!("embedder:   {}", pipeline.store().embedder().model_id());
    println!("llm model:  {}", config.llm.model);

    let collections = pipeline.store().list().await?;
    if collections.is_empty() {
        println!("no collections yet");
        return Ok(());
    }
    println!();
    for info in collections {
        println!(
            "{:<24} {:>8} entries  {:>5} dims  {}",
            info.name, info.len, info.dimensions, info.embedding_model
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_paths_reads_directories_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"b").unwrap();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let single = dir.path().join("nested").join("c.zip");
        std::fs::write(&single, b"c").unwrap();

        let files = expand_paths(&[dir.path().to_path_buf(), single.clone()]).unwrap();
        let names: Vec<_> =
            files.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["a.png", "b.pdf", "c.zip"]);
    }

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "docchat", "ask", "what", "is", "this", "--collection", "notes", "--top-k", "3",
        ])
        .unwrap();
        assert_eq!(cli.collection.as_deref(), Some("notes"));
        assert_eq!(cli.top_k, Some(3));
        match cli.command {
            Commands::Ask { question } => assert_eq!(question.join(" "), "what is this"),
            _ => panic!("expected ask"),
        }
    }
}
