use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use obd_llm::logging::{self, LogLevel};
use obd_llm::obd::decode_response;
use obd_llm::ollama::{OllamaEmbedder, OllamaLoader, OllamaWeights, build_ollama};
use obd_llm::{
    Config, DiagnosticAssistant, InferenceSession, InferenceSessionRegistry, Reply,
    SemanticIntentMatcher, StreamingReply, config,
};
use ollama_rs::Ollama;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "obd-llm", about = "Vehicle diagnostics questions answered by a local LLM")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "OBD_LLM_CONFIG")]
    config: Option<PathBuf>,

    /// Model tag used for generation
    #[arg(long, env = "OBD_LLM_MODEL")]
    model: Option<String>,

    /// Base URL of the Ollama server
    #[arg(long, env = "OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Minimum similarity for an intent match
    #[arg(long)]
    threshold: Option<f32>,

    /// Logging verbosity level
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a question with a PID request or a short model reply
    Ask {
        question: String,
        /// Print the fallback answer as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Classify a question against the intent catalog
    Classify {
        question: String,
        /// Show every entry's score
        #[arg(long)]
        rank: bool,
    },
    /// Stream a raw completion for a prompt
    Stream { prompt: String },
    /// Decode an adapter response such as "41 0C 1A F8"
    Decode {
        response: String,
        /// Ask the model for a short comment on the reading
        #[arg(long)]
        comment: bool,
    },
}

impl Cli {
    async fn settings(&self) -> anyhow::Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => config::load(path)
                .await
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(model) = &self.model {
            cfg.session.model_path = PathBuf::from(model);
        }
        if let Some(url) = &self.ollama_url {
            cfg.ollama.base_url = url.clone();
        }
        if let Some(threshold) = self.threshold {
            cfg.matcher.threshold = threshold;
        }
        Ok(cfg)
    }
}

async fn session(client: &Ollama, cfg: &Config) -> anyhow::Result<Arc<InferenceSession>> {
    let registry = InferenceSessionRegistry::with_weights(
        OllamaLoader::new(client.clone()),
        OllamaWeights::new(client.clone()),
    );
    Ok(registry.get_session(&cfg.session).await?)
}

async fn matcher(client: &Ollama, cfg: &Config) -> SemanticIntentMatcher {
    let matcher = SemanticIntentMatcher::with_config(
        Arc::new(OllamaEmbedder::new(
            client.clone(),
            cfg.ollama.embedding_model.clone(),
        )),
        cfg.matcher.clone(),
    );
    let report = matcher.load_catalog(cfg.catalog()).await;
    for failure in &report.failures {
        warn!(code = %failure.code, error = %failure.error, "intent left out");
    }
    matcher
}

async fn print_stream<S, E>(mut stream: S) -> anyhow::Result<()>
where
    S: futures::Stream<Item = Result<obd_llm::GenerationChunk, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut out = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        write!(out, "{}", chunk?.text)?;
        out.flush()?;
    }
    writeln!(out)?;
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = cli.settings().await?;
    if let Command::Decode {
        response,
        comment: false,
    } = &cli.command
    {
        println!("{}", decode_response(response)?);
        return Ok(());
    }

    let client = build_ollama(&cfg.ollama.base_url)?;
    info!(url = %cfg.ollama.base_url, model = %cfg.session.model_path.display(), "using ollama");
    match cli.command {
        Command::Ask { question, stream } => {
            let assistant = DiagnosticAssistant::with_prompts(
                Arc::new(matcher(&client, &cfg).await),
                session(&client, &cfg).await?,
                cfg.prompts.clone(),
            );
            if stream {
                match assistant.ask_streaming(&question).await? {
                    StreamingReply::Request { code, score, .. } => {
                        println!("request {code} (score {score:.3})");
                    }
                    StreamingReply::Answer(answer) => print_stream(answer).await?,
                }
            } else {
                match assistant.ask(&question).await? {
                    Reply::Request { code, score, .. } => {
                        println!("request {code} (score {score:.3})");
                    }
                    Reply::Answer { text } => println!("{text}"),
                }
            }
        }
        Command::Classify { question, rank } => {
            let matcher = matcher(&client, &cfg).await;
            if rank {
                for result in matcher.rank(&question).await? {
                    println!("{:.4}  {}  {}", result.score, result.code, result.reference_text);
                }
            } else {
                match matcher.classify(&question).await? {
                    obd_llm::MatchOutcome::Matched { code, score } => {
                        println!("{code} {score:.4}")
                    }
                    obd_llm::MatchOutcome::NoMatch { reason } => println!("no match: {reason}"),
                }
            }
        }
        Command::Stream { prompt } => {
            let session = session(&client, &cfg).await?;
            print_stream(session.generate_streaming(&prompt)?).await?;
        }
        Command::Decode { response, .. } => {
            let assistant = DiagnosticAssistant::with_prompts(
                Arc::new(SemanticIntentMatcher::new(Arc::new(OllamaEmbedder::new(
                    client.clone(),
                    cfg.ollama.embedding_model.clone(),
                )))),
                session(&client, &cfg).await?,
                cfg.prompts.clone(),
            );
            let commentary = assistant.comment(&response).await?;
            println!("{}", commentary.reading);
            if let Some(comment) = commentary.comment {
                println!("{comment}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level);
    run(cli).await
}
