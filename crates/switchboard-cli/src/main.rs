use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switchboard_core::{
    BotRoster, ContextBuilder, ConversationSimulator, InboundMessage, OrchestrationReply,
    RunOutcome, SimulationEnd,
};

mod config;

use config::SwitchboardConfig;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Switchboard, a multi-agent customer conversation router")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Run one customer message through a bot
    Ask {
        /// Bot id
        #[arg(short, long)]
        bot: String,

        /// Channel the message arrived on
        #[arg(long, default_value = "cli")]
        channel: String,

        /// Print the run trace as JSON after the reply
        #[arg(long)]
        trace: bool,

        /// The customer message
        message: String,
    },

    /// Play a simulated customer against a bot
    Simulate {
        /// Bot id
        #[arg(short, long)]
        bot: String,

        /// Test scenario that steers the customer's opening message
        #[arg(short, long)]
        scenario: Option<String>,

        /// Agent id of the simulated customer
        #[arg(long)]
        customer: Option<String>,

        /// Stop after this many exchanges
        #[arg(long, default_value_t = switchboard_core::simulation::DEFAULT_MAX_EXCHANGES)]
        max_exchanges: u32,
    },

    /// List the agents a bot dispatches to
    Agents {
        /// Bot id
        bot: String,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Agents { bot } => cmd_agents(&cli.config, &bot).await,
        Commands::Ask {
            bot,
            channel,
            trace,
            message,
        } => cmd_ask(&cli.config, &bot, &channel, &message, trace).await,
        Commands::Simulate {
            bot,
            scenario,
            customer,
            max_exchanges,
        } => {
            cmd_simulate(
                &cli.config,
                &bot,
                scenario.as_deref(),
                customer.as_deref(),
                max_exchanges,
            )
            .await
        }
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600)).await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    for dir in ["logs", "knowledge"] {
        tokio::fs::create_dir_all(config_dir.join(dir)).await?;
    }

    println!("Switchboard initialized at {}", config_dir.display());
    println!("Edit {} to configure providers, agents and bots.", config_path.display());
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    println!("{:#?}", cfg);
    Ok(())
}

async fn load_roster(cfg: &SwitchboardConfig, bot: &str) -> Result<BotRoster> {
    let store = cfg.build_store()?;
    BotRoster::load(&store, bot).await
}

async fn cmd_agents(config_path: &Option<PathBuf>, bot: &str) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let roster = load_roster(&cfg, bot).await?;

    println!("{} ({})", roster.bot().name, roster.bot().id);
    let entry = |label: &str, agent: Option<&switchboard_core::AgentRecord>| match agent {
        Some(a) => println!("  {:<14} {} [{}]", label, a.name, a.model),
        None => println!("  {:<14} -", label),
    };
    entry("triage", roster.triage());
    entry("coordinator", roster.coordinator());
    for agent in roster.linked() {
        let status = if agent.is_usable() { "" } else { " (inactive)" };
        println!(
            "  {:<14} {} [{}]{}",
            agent.role.label(),
            agent.name,
            agent.model,
            status
        );
    }
    Ok(())
}

async fn cmd_ask(
    config_path: &Option<PathBuf>,
    bot: &str,
    channel: &str,
    message: &str,
    show_trace: bool,
) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let roster = load_roster(&cfg, bot).await?;
    let orchestrator = cfg.build_orchestrator()?;

    let context = ContextBuilder::new().build(InboundMessage::text(message).on_channel(channel, "cli"))?;
    let reply = orchestrator
        .run_orchestrator_reply(&roster, &context, message)
        .await?;

    print_reply(&reply);
    if show_trace {
        println!("{}", serde_json::to_string_pretty(&reply.trace)?);
    }
    Ok(())
}

fn print_reply(reply: &OrchestrationReply) {
    println!("{}", reply.text);
    match reply.outcome {
        RunOutcome::Answered(role) => info!("Answered by {} ({})", role, reply.usage),
        other => info!("Run ended as {:?} ({})", other, reply.usage),
    }
    if let Some(summary) = &reply.handoff {
        println!("\n--- Handoff summary ---\n{}", summary.render());
    }
}

async fn cmd_simulate(
    config_path: &Option<PathBuf>,
    bot: &str,
    scenario: Option<&str>,
    customer: Option<&str>,
    max_exchanges: u32,
) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let roster = load_roster(&cfg, bot).await?;
    let orchestrator = cfg.build_orchestrator()?;
    let customer = cfg.simulated_customer(customer)?;

    let context = ContextBuilder::new().build(InboundMessage::text("simulacao").on_channel("simulador", "simulador"))?;
    let report = ConversationSimulator::new(&orchestrator, customer)
        .with_max_exchanges(max_exchanges)
        .run(&roster, &context, scenario)
        .await?;

    for message in &report.transcript {
        println!("{}: {}\n", message.speaker.label(), message.text);
    }

    match &report.end {
        SimulationEnd::CustomerFinished => println!("Conversa encerrada pelo cliente."),
        SimulationEnd::HandedOff => println!("Conversa transferida para humano."),
        SimulationEnd::SafetyStop => println!(
            "Simulacao pausada por seguranca ({} interacoes).",
            report.exchanges
        ),
        SimulationEnd::CustomerFailed(reason) => println!("Erro agente cliente: {}", reason),
    }
    if let Some(summary) = &report.handoff {
        println!("\n--- Handoff summary ---\n{}", summary.render());
    }
    info!(
        "{} exchanges, usage {}",
        report.exchanges, report.usage_total
    );
    Ok(())
}
