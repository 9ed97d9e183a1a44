//! om-sim: run one OM(m) broadcast and print the reporter's output.
//!
//! ```text
//! om-sim --loyalty LLLT --reporter 0 --sender 1 --command A
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use byzantine_om::{
    Adversary, Constant, Decision, GeneralId, Inverting, ParityAdversary, Run, RunConfig,
};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "om-sim", version, about = "Byzantine Generals with Lamport's Oral Messages")]
struct Args {
    /// One character per general: L (loyal) or T (traitor)
    #[arg(short, long, default_value = "LLLL", value_parser = parse_loyalty)]
    loyalty: Loyalty,

    /// General whose OM(0) letters are printed
    #[arg(short, long, default_value_t = 0)]
    reporter: usize,

    /// General issuing the order
    #[arg(short, long, default_value_t = 1)]
    sender: usize,

    /// Order to issue: A or R
    #[arg(short, long, default_value = "A", value_parser = parse_command)]
    command: Decision,

    /// What traitors say
    #[arg(long, value_enum, default_value_t = AdversaryKind::Parity)]
    adversary: AdversaryKind,

    /// Mailbox capacity override (defaults to OM_MAILBOX_CAPACITY or auto)
    #[arg(long)]
    mailbox_capacity: Option<usize>,

    /// Maximum recursion depth override (defaults to OM_MAX_DEPTH or 3)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Print the full outcome as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AdversaryKind {
    /// Even targets hear Retreat, odd targets hear Attack
    Parity,
    /// Flip every relayed order
    Inverting,
    /// Always say Attack
    Attack,
    /// Always say Retreat
    Retreat,
}

impl AdversaryKind {
    fn build(self) -> Arc<dyn Adversary> {
        match self {
            Self::Parity => Arc::new(ParityAdversary),
            Self::Inverting => Arc::new(Inverting),
            Self::Attack => Arc::new(Constant(Decision::Attack)),
            Self::Retreat => Arc::new(Constant(Decision::Retreat)),
        }
    }
}

/// Loyalty vector parsed from a single argument.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Loyalty(Vec<bool>);

fn parse_loyalty(s: &str) -> Result<Loyalty, String> {
    s.chars()
        .map(|c| match c {
            'L' | 'l' | '1' => Ok(true),
            'T' | 't' | '0' => Ok(false),
            other => Err(format!("unexpected {other:?}, use L for loyal and T for traitor")),
        })
        .collect::<Result<_, _>>()
        .map(Loyalty)
}

fn parse_command(s: &str) -> Result<Decision, String> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Decision::try_from(c).map_err(|e| e.to_string()),
        _ => Err(format!("expected a single character, got {s:?}")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "om_sim=info,byzantine_om=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match simulate(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn simulate(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = RunConfig::from_env();
    if let Some(capacity) = args.mailbox_capacity {
        config = config.with_mailbox_capacity(capacity);
    }
    if let Some(depth) = args.max_depth {
        config = config.with_max_depth(depth);
    }

    let run = Run::setup_with_adversary(
        &args.loyalty.0,
        GeneralId(args.reporter),
        config,
        args.adversary.build(),
    )?;

    let handles = run.spawn_generals();
    let result = run.broadcast(args.command, GeneralId(args.sender)).await;
    // Releases generals still waiting if the broadcast never went out.
    run.cleanup();
    for handle in handles {
        if let Err(e) = handle.await? {
            tracing::debug!("general exited with {}", e);
        }
    }
    let outcome = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("OM({}) from general {} ({})", run.depth(), outcome.sender, outcome.command);
    println!();
    println!("Reporter {} received at depth 0:", outcome.reporter);
    for line in outcome.trace_lines() {
        println!("  {}", line);
    }
    println!();
    println!("Decisions:");
    for (id, decision) in &outcome.decisions {
        let role = if outcome.loyal.get(id.0).copied().unwrap_or(false) {
            "loyal"
        } else {
            "traitor"
        };
        println!("  general {} ({}): {}", id, role, decision);
    }
    println!();
    println!(
        "Letters delivered: {}  Loyal agreement: {}",
        outcome.delivered,
        if outcome.loyal_agree() { "yes" } else { "no" }
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loyalty_parsing() {
        assert_eq!(parse_loyalty("LLTl").unwrap().0, vec![true, true, false, true]);
        assert_eq!(parse_loyalty("1100").unwrap().0, vec![true, true, false, false]);
        assert!(parse_loyalty("LXL").is_err());
    }

    #[test]
    fn command_parsing() {
        assert_eq!(parse_command("A").unwrap(), Decision::Attack);
        assert_eq!(parse_command("r").unwrap(), Decision::Retreat);
        assert!(parse_command("AR").is_err());
        assert!(parse_command("Q").is_err());
    }

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from([
            "om-sim", "--loyalty", "LLLT", "--sender", "3", "--command", "R", "--adversary",
            "inverting",
        ])
        .unwrap();
        assert_eq!(args.loyalty.0, vec![true, true, true, false]);
        assert_eq!(args.sender, 3);
        assert_eq!(args.command, Decision::Retreat);
        assert!(matches!(args.adversary, AdversaryKind::Inverting));
    }
}
