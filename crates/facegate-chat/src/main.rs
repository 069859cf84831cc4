use anyhow::{Context, Result};
use clap::Parser;
use facegate_rag::{ChatError, Chatbot, MiniLmEmbedder, RigGenerator};
use facegate_store::FaceStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facegate-chat", about = "Ask about registered users, or anything else")]
struct Cli {
    /// Question to answer. Reads one question per line from stdin when omitted.
    question: Option<String>,
    /// Print the full reply (intent, context, prompt) as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::info!(db = %config.db_path.display(), model = %config.llm_model, "facegate-chat starting");

    // The store is only needed to seed the session index.
    let users = FaceStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?
        .list_users()?;

    let embedder = MiniLmEmbedder::load(&config.text_model_dir)?;
    let generator = RigGenerator::from_env(config.llm_model.clone(), config.max_answer_tokens)?;
    let mut bot = Chatbot::new(&users, Box::new(embedder), Box::new(generator), config.retrieval_k)?;
    tracing::info!(documents = bot.documents().len(), "chatbot ready");

    if let Some(question) = cli.question {
        return ask(&mut bot, &question, cli.json).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(err) = ask(&mut bot, &line, cli.json).await {
            tracing::error!(error = %err, "question failed");
            eprintln!("Error: {err:#}");
        }
    }
    Ok(())
}

async fn ask(bot: &mut Chatbot, question: &str, json: bool) -> Result<()> {
    match bot.answer(question).await {
        Ok(reply) if json => println!("{}", serde_json::to_string(&reply)?),
        Ok(reply) => println!("Answer: {}", reply.text),
        Err(ChatError::EmptyQuestion) => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
