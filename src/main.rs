//! NutriMind 命令行
//!
//! 用法: nutrimind ask --question "Can I take fish oil with warfarin?" --profile profile.json [--config path] [--json]

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nutrimind::config::load_config;
use nutrimind::observability;
use nutrimind::workflow::{create_graph_from_config, create_llm_from_config, WorkflowBuilder};
use nutrimind::PatientProfile;

#[derive(Parser, Debug)]
#[command(name = "nutrimind", version, about = "Supplement, medication and diet safety assistant")]
struct Cli {
    /// 额外的 TOML 配置文件（覆盖 config/default.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 回答一个问题
    Ask {
        #[arg(long, short)]
        question: String,

        /// 患者档案 JSON（medications / supplements / conditions / dietary_restrictions）
        #[arg(long, short)]
        profile: Option<PathBuf>,

        /// 输出完整 JSON（含证据链）
        #[arg(long)]
        json: bool,
    },
}

fn read_profile(path: Option<&PathBuf>) -> anyhow::Result<PatientProfile> {
    let Some(path) = path else {
        return Ok(PatientProfile::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Invalid profile JSON in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    observability::init(&cfg.app.log_level);

    match cli.command {
        Command::Ask {
            question,
            profile,
            json,
        } => {
            let profile = read_profile(profile.as_ref())?;
            let engine = WorkflowBuilder::new(
                create_llm_from_config(&cfg),
                create_graph_from_config(&cfg).context("Failed to open knowledge graph")?,
            )
            .with_config(&cfg)
            .build()
            .context("Failed to build workflow")?;

            let answer = engine.answer(&question, profile).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.answer);
                println!();
                println!(
                    "(confidence {:.2}, {} iteration(s))",
                    answer.confidence, answer.iterations
                );
            }
        }
    }

    Ok(())
}
