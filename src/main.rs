use anyhow::Result;
use clap::Parser;
use parsegen::dataset::GoldenDataset;
use parsegen::generator::{CodeGenerator, LlmGenerator, TemplateGenerator};
use parsegen::repair_loop::{RepairLoop, RunResult, MAX_ATTEMPTS};
use parsegen::sandbox::SandboxExecutor;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parsegen")]
#[command(about = "Bank statement parser generator with bounded self-repair")]
struct Args {
    /// Target bank key, e.g. icici or sbi
    #[arg(long)]
    target: String,

    /// Override for the data directory (default: data/<target>)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Self-fix attempt ceiling
    #[arg(long, default_value_t = MAX_ATTEMPTS)]
    max_attempts: u8,

    /// Wall-clock budget for one sandboxed candidate run, in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// OpenAI API key (or set OPENAI_API_KEY; omit for the offline
    /// template generator)
    #[arg(long)]
    api_key: Option<String>,

    /// Where the accepted parser is written on convergence
    #[arg(long, default_value = "custom_parsers")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let dataset = GoldenDataset::load(&args.target, args.data_dir.as_deref())?;

    let generator: Box<dyn CodeGenerator> = match args
        .api_key
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    {
        Some(key) if !key.is_empty() => Box::new(LlmGenerator::new(key)),
        _ => {
            info!("no API key configured, using the offline template generator");
            Box::new(TemplateGenerator)
        }
    };

    let executor = SandboxExecutor::new(Duration::from_secs(args.timeout_secs));
    let repair_loop = RepairLoop::new(args.max_attempts);

    let result = repair_loop
        .run(&dataset, generator.as_ref(), &executor)
        .await?;

    match result {
        RunResult::Converged {
            source,
            attempt,
            history,
        } => {
            let output = args
                .output_dir
                .join(format!("{}_parser.py", dataset.target));
            fs::create_dir_all(&args.output_dir)?;
            fs::write(&output, &source)?;
            for record in &history {
                println!("Attempt {}: FAIL -> {}", record.attempt, record.diagnostic);
            }
            println!("Attempt {}: PASS", attempt);
            println!("Accepted parser written to {}", output.display());
            Ok(())
        }
        RunResult::Exhausted { history } => {
            for record in &history {
                println!("Attempt {}: FAIL -> {}", record.attempt, record.diagnostic);
            }
            println!("Max attempts reached without success.");
            std::process::exit(1);
        }
    }
}
