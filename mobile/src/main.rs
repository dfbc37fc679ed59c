use chatgen::tokenizer::load_tokenizer;
use chatgen::transcript::TranscriptStore;
use chatgen::{ChatSession, GenerationConfig, GenerationEngine, SourcePaths, TurnStatus};
use clap::{Parser, Subcommand};
use mobile::QuantizedModel;
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chat", about = "Interactive chat over a local model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a random quantized model sized for a vocabulary
    InitModel {
        #[arg(long)]
        vocab: PathBuf,
        /// Output file for the quantized model
        #[arg(long, default_value = "model.q8")]
        out: PathBuf,
        #[arg(long, default_value_t = 32)]
        dim: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
    /// Start an interactive chat
    Run(RunArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    #[arg(long)]
    vocab: PathBuf,
    /// special_tokens_map.json-style document
    #[arg(long)]
    special: Option<PathBuf>,
    #[arg(long, default_value = "model.q8")]
    model: PathBuf,
    /// JSON generation config; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// SQLite file for the transcript
    #[arg(long)]
    history: Option<PathBuf>,
    #[arg(long)]
    temperature: Option<f32>,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long)]
    top_p: Option<f32>,
    #[arg(long)]
    max_new_tokens: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    match Cli::parse().command {
        Command::InitModel {
            vocab,
            out,
            dim,
            seed,
        } => init_model(vocab, out, dim, seed),
        Command::Run(args) => run(args),
    }
}

fn init_model(vocab: PathBuf, out: PathBuf, dim: usize, seed: u64) -> Result<(), Box<dyn Error>> {
    let sources = SourcePaths {
        vocabulary: vocab,
        ..Default::default()
    };
    let tokenizer = load_tokenizer(&sources)?;
    let model = QuantizedModel::random(tokenizer.vocab_size(), dim, seed);
    model.save(&out)?;
    println!(
        "Saved quantized model ({} x {}) to {:?}",
        tokenizer.vocab_size(),
        dim,
        out
    );
    Ok(())
}

fn run(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => GenerationConfig::from_file(path)?,
        None => GenerationConfig::default(),
    };
    config.sources = SourcePaths {
        vocabulary: args.vocab,
        special_tokens: args.special,
        model: args.model,
    };
    if let Some(t) = args.temperature {
        config.temperature = t;
    }
    if let Some(k) = args.top_k {
        config.top_k = k;
    }
    if let Some(p) = args.top_p {
        config.top_p = p;
    }
    if let Some(n) = args.max_new_tokens {
        config.max_new_tokens = n;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let model = QuantizedModel::load_mmap(&config.sources.model)?
        .with_tensor_names(config.tensors.clone());
    let engine = GenerationEngine::from_sources(config, model)?;

    // the worker owns one connection; this one serves !stats and !clear
    let (transcript, history) = match &args.history {
        Some(path) => (
            Some(TranscriptStore::new(path)?),
            Some(TranscriptStore::new(path)?),
        ),
        None => (None, None),
    };
    let session = ChatSession::spawn(engine, transcript);

    println!("Type a message. Commands: !reset, !stats, !clear, quit");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        match line {
            "quit" | "exit" => break,
            "!reset" => {
                session.reset()?;
                println!("(context cleared)");
            }
            "!stats" => match &history {
                Some(store) => {
                    let stats = store.stats()?;
                    println!(
                        "turns={} generated_tokens={} aborted={} db_bytes={}",
                        stats.total_turns,
                        stats.generated_tokens,
                        stats.aborted_turns,
                        stats.db_size_bytes
                    );
                }
                None => println!("(no --history database)"),
            },
            "!clear" => match &history {
                Some(store) => {
                    store.clear()?;
                    println!("(history cleared)");
                }
                None => println!("(no --history database)"),
            },
            text => {
                let reply = session.submit(text)?.wait()?;
                match reply.status {
                    TurnStatus::Skipped => {}
                    TurnStatus::Aborted(err) => {
                        if !reply.text.is_empty() {
                            println!("{}", reply.text);
                        }
                        eprintln!("error: {}", err);
                    }
                    _ => println!("{}", reply.text),
                }
            }
        }
    }
    Ok(())
}
