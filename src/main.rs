use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use pdf_rag_lib::config::{DEFAULT_EMBEDDING_MODEL, DEFAULT_INDEX_DIR, DEFAULT_MODEL};
use pdf_rag_lib::rag::read_meta;
use pdf_rag_lib::{
    BackendConfig, GenerationSettings, PipelineConfig, RagPipeline, RagResult, RetrievalSettings,
};

#[derive(Parser, Debug)]
#[command(name = "pdf-rag", version, about = "Ask questions about your PDFs using a local model")]
struct Cli {
    /// Directory holding meta.json, chunks.jsonl and vectors.bin
    #[arg(long, global = true, env = "PDF_RAG_INDEX_DIR", default_value = DEFAULT_INDEX_DIR)]
    index_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a question from the indexed documents
    Ask(AskArgs),
    /// Show index metadata and whether the backend is reachable
    Status,
}

#[derive(Args, Debug)]
struct AskArgs {
    question: String,

    /// Generation model
    #[arg(long, env = "PDF_RAG_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Embedding model; must match the one the index was built with
    #[arg(long, env = "PDF_RAG_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Number of passages to retrieve
    #[arg(short, long, default_value_t = 3)]
    k: usize,

    /// Plain similarity ranking instead of MMR
    #[arg(long)]
    no_mmr: bool,

    /// MMR candidate pool (default max(4k, 20))
    #[arg(long)]
    fetch_k: Option<usize>,

    /// MMR relevance/diversity balance in [0, 1]
    #[arg(long, default_value_t = 0.5)]
    lambda: f32,

    /// Characters kept from each passage
    #[arg(long, default_value_t = 400)]
    snippet_chars: usize,

    /// Maximum tokens to generate
    #[arg(long, default_value_t = 256)]
    num_predict: u32,

    /// Model context window
    #[arg(long, default_value_t = 2048)]
    num_ctx: u32,

    /// Print the answer as it is generated
    #[arg(long)]
    stream: bool,
}

impl AskArgs {
    fn pipeline_config(&self, index_dir: PathBuf) -> RagResult<PipelineConfig> {
        Ok(PipelineConfig {
            index_dir,
            embedding_model: self.embedding_model.clone(),
            backend: BackendConfig::from_env()?,
            retrieval: RetrievalSettings {
                k: self.k,
                use_diversity: !self.no_mmr,
                fetch_k: self.fetch_k,
                snippet_chars: self.snippet_chars,
                mmr_lambda: self.lambda,
            },
            generation: GenerationSettings {
                model: self.model.clone(),
                num_ctx: self.num_ctx,
                num_predict: self.num_predict,
            },
        })
    }
}

fn print_sources(sources: &[String]) {
    println!("\nSources:");
    if sources.is_empty() {
        println!("  (none)");
    }
    for source in sources {
        println!("  - {source}");
    }
}

async fn ask(args: AskArgs, index_dir: PathBuf) -> RagResult<()> {
    let config = args.pipeline_config(index_dir)?;
    let pipeline = RagPipeline::open(&config).await?;

    if args.stream {
        let mut answer = pipeline.stream_question(&args.question).await?;
        let mut stdout = std::io::stdout();
        let mut failure = None;
        while let Some(fragment) = answer.stream.next().await {
            match fragment {
                Ok(fragment) => {
                    let _ = write!(stdout, "{fragment}");
                    let _ = stdout.flush();
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        println!();
        print_sources(&answer.sources);
        if let Some(e) = failure {
            return Err(e);
        }
    } else {
        let answer = pipeline.answer_question(&args.question).await?;
        println!("{}", answer.answer);
        print_sources(&answer.sources);
    }
    Ok(())
}

async fn status(index_dir: PathBuf) -> RagResult<()> {
    match read_meta(&index_dir) {
        Ok(meta) => {
            println!("Index:      {}", index_dir.display());
            println!("  model:    {} ({} dims)", meta.embedding_model, meta.dimensions);
            println!("  chunks:   {} from {} files", meta.chunk_count, meta.file_count);
            println!("  indexed:  {}", meta.last_indexed);
        }
        Err(e) => println!("Index:      {e}"),
    }

    let backend = BackendConfig::from_env()?;
    let status = backend.status().await;
    let state = if status.running { "running" } else { "not reachable" };
    println!("Backend:    {} ({state})", status.base_url);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Ask(args) => ask(args, cli.index_dir).await,
        Command::Status => status(cli.index_dir).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "request failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
