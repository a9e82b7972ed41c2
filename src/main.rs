use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use mirror::chores::normalize_preference;
use mirror::config::HouseConfig;
use mirror::core::storage::Storage;
use mirror::core::utils::{month_start, next_month_start};
use mirror::Mirror;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory of the sled database
    #[arg(long, default_value = "mirror-data")]
    data_dir: PathBuf,

    /// YAML configuration file (otherwise MIRROR_CONFIG_FILE and MIRROR_* variables)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Moment the command runs at, RFC 3339 (defaults to now)
    #[arg(long, value_parser = parse_time)]
    at: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage houses
    House {
        #[command(subcommand)]
        command: HouseCommands,
    },
    /// Manage residents
    Resident {
        #[command(subcommand)]
        command: ResidentCommands,
    },
    /// Manage chores and their values
    Chore {
        #[command(subcommand)]
        command: ChoreCommands,
    },
    /// Prefer one chore over another
    Prefer {
        house: String,
        resident: String,
        /// Chore that should be worth more
        target: u64,
        /// Chore that should be worth less
        source: u64,
        /// 1 for a full preference, 0.5 for indifference
        #[arg(long, default_value_t = 1.0)]
        strength: f64,
    },
    /// Claim chores and settle claims
    Claim {
        #[command(subcommand)]
        command: ClaimCommands,
    },
    /// Vote on a claim or proposal poll
    Vote {
        poll_id: u64,
        resident: String,
        ballot: Ballot,
    },
    /// Propose changes to the chore list
    Proposal {
        #[command(subcommand)]
        command: ProposalCommands,
    },
    /// Manage chore breaks
    Break {
        #[command(subcommand)]
        command: BreakCommands,
    },
    /// Gift points to another resident
    Gift {
        house: String,
        from: String,
        to: String,
        points: f64,
    },
    /// Show a resident's points for the current month
    Points { house: String, resident: String },
    /// Show the penalty a resident owes for last month
    Penalty { house: String, resident: String },
    /// Run the bookkeeping triggered by a resident's activity
    Activity { house: String, resident: String },
}

#[derive(Subcommand)]
enum HouseCommands {
    /// Register a house
    Add { house: String },
}

#[derive(Subcommand)]
enum ResidentCommands {
    /// Add or reactivate a resident
    Add { house: String, resident: String },
    /// Mark a resident as having left
    Deactivate { house: String, resident: String },
    /// Exempt a resident from chores
    Exempt { house: String, resident: String },
    /// Lift an exemption
    Unexempt { house: String, resident: String },
    /// List active residents
    List { house: String },
}

#[derive(Subcommand)]
enum ChoreCommands {
    /// Add a chore directly, bypassing a proposal
    Add {
        house: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List active chores
    List { house: String },
    /// Show current chore values, crediting pending value first
    Values { house: String },
    /// Show chore rankings
    Rankings { house: String },
}

#[derive(Subcommand)]
enum ClaimCommands {
    /// Claim a chore
    Create { house: String, resident: String, chore: u64 },
    /// Show a claim
    Show { house: String, claim: u64 },
    /// Resolve one claim, or every claim whose poll has closed
    Resolve { house: String, claim: Option<u64> },
}

#[derive(Subcommand)]
enum ProposalCommands {
    /// Propose a new chore
    Add {
        house: String,
        resident: String,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Propose renaming or redescribing a chore
    Edit {
        house: String,
        resident: String,
        chore: u64,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Propose deleting a chore
    Delete { house: String, resident: String, chore: u64 },
    /// List proposals
    List { house: String },
    /// Resolve one proposal, or every proposal whose poll has closed
    Resolve { house: String, proposal: Option<u64> },
}

#[derive(Subcommand)]
enum BreakCommands {
    /// Take a break from `start` until `end` (RFC 3339)
    Add {
        house: String,
        resident: String,
        #[arg(value_parser = parse_time)]
        start: DateTime<Utc>,
        #[arg(value_parser = parse_time)]
        end: DateTime<Utc>,
        #[arg(long, default_value = "")]
        circumstance: String,
    },
    /// Cancel a break
    Delete { house: String, id: u64 },
    /// List breaks in effect
    List { house: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Ballot {
    Yes,
    No,
    Abstain,
}

impl Ballot {
    fn vote(self) -> Option<bool> {
        match self {
            Ballot::Yes => Some(true),
            Ballot::No => Some(false),
            Ballot::Abstain => None,
        }
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time {}: {}", s, e))
}

fn metadata(description: Option<String>) -> serde_json::Value {
    match description {
        Some(description) => json!({ "description": description }),
        None => json!({}),
    }
}

fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<HouseConfig> {
    let config = match path {
        Some(path) => {
            let mut config = HouseConfig::from_file(path)?;
            config.apply_overrides(|name| std::env::var(name).ok())?;
            config.validate()?;
            config
        }
        None => HouseConfig::from_env()?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_ref()).context("Failed to load configuration")?;
    mirror::core::init_tracing(&config.log_level);

    let now = cli.at.unwrap_or_else(Utc::now);
    debug!("Running at {} on {}", now, cli.data_dir.display());

    let mirror = Mirror::open(&cli.data_dir, config)
        .with_context(|| format!("Failed to open {}", cli.data_dir.display()))?;
    let admin = mirror.admin();
    let chores = mirror.chores();

    match cli.command {
        Commands::House { command } => match command {
            HouseCommands::Add { house } => print(&admin.add_house(&house).await?)?,
        },
        Commands::Resident { command } => match command {
            ResidentCommands::Add { house, resident } => {
                print(&admin.add_resident(&house, &resident, now).await?)?
            }
            ResidentCommands::Deactivate { house, resident } => {
                print(&admin.deactivate_resident(&house, &resident).await?)?
            }
            ResidentCommands::Exempt { house, resident } => {
                print(&admin.exempt_resident(&house, &resident, now).await?)?
            }
            ResidentCommands::Unexempt { house, resident } => {
                print(&admin.unexempt_resident(&house, &resident).await?)?
            }
            ResidentCommands::List { house } => print(&admin.get_residents(&house).await?)?,
        },
        Commands::Chore { command } => match command {
            ChoreCommands::Add { house, name, description } => {
                print(&chores.add_chore(&house, &name, metadata(description)).await?)?
            }
            ChoreCommands::List { house } => print(&chores.get_chores(&house).await?)?,
            ChoreCommands::Values { house } => {
                print(&chores.get_updated_chore_values(&house, now).await?)?
            }
            ChoreCommands::Rankings { house } => {
                print(&chores.get_current_chore_rankings(&house).await?)?
            }
        },
        Commands::Prefer { house, resident, target, source, strength } => {
            let (alpha, beta, preference) = normalize_preference(target, source, strength)?;
            print(&chores.set_chore_preference(&house, &resident, alpha, beta, preference).await?)?
        }
        Commands::Claim { command } => match command {
            ClaimCommands::Create { house, resident, chore } => {
                let claim = chores.claim_chore(&house, chore, &resident, now).await?;
                // The claimant backs their own claim
                mirror.polls().submit_vote(claim.poll_id, &resident, now, Some(true)).await?;
                print(&claim)?
            }
            ClaimCommands::Show { house, claim } => print(&chores.get_chore_claim(&house, claim).await?)?,
            ClaimCommands::Resolve { house, claim: Some(claim) } => {
                match chores.resolve_chore_claim(&house, claim, now).await? {
                    Some(claim) => print(&claim)?,
                    None => bail!("Claim {} was already resolved", claim),
                }
            }
            ClaimCommands::Resolve { house, claim: None } => {
                print(&chores.resolve_chore_claims(&house, now).await?)?
            }
        },
        Commands::Vote { poll_id, resident, ballot } => {
            print(&mirror.polls().submit_vote(poll_id, &resident, now, ballot.vote()).await?)?
        }
        Commands::Proposal { command } => match command {
            ProposalCommands::Add { house, resident, name, description } => print(
                &chores
                    .create_add_chore_proposal(&house, &resident, &name, metadata(description), now)
                    .await?,
            )?,
            ProposalCommands::Edit { house, resident, chore, name, description } => print(
                &chores
                    .create_edit_chore_proposal(&house, &resident, chore, &name, metadata(description), now)
                    .await?,
            )?,
            ProposalCommands::Delete { house, resident, chore } => {
                print(&chores.create_delete_chore_proposal(&house, &resident, chore, now).await?)?
            }
            ProposalCommands::List { house } => print(&chores.get_chore_proposals(&house).await?)?,
            ProposalCommands::Resolve { house, proposal: Some(proposal) } => {
                print(&chores.resolve_chore_proposal(&house, proposal, now).await?)?
            }
            ProposalCommands::Resolve { house, proposal: None } => {
                print(&chores.resolve_chore_proposals(&house, now).await?)?
            }
        },
        Commands::Break { command } => match command {
            BreakCommands::Add { house, resident, start, end, circumstance } => print(
                &chores
                    .add_chore_break(&house, &resident, start, end, &circumstance)
                    .await?,
            )?,
            BreakCommands::Delete { house, id } => print(&chores.delete_chore_break(&house, id).await?)?,
            BreakCommands::List { house } => print(&chores.get_chore_breaks(&house, now).await?)?,
        },
        Commands::Gift { house, from, to, points } => {
            print(&chores.gift_chore_points(&house, &from, &to, now, points).await?)?
        }
        Commands::Points { house, resident } => {
            let summary = chores
                .get_points_summary(&house, &resident, month_start(now), next_month_start(now))
                .await?;
            print(&summary)?
        }
        Commands::Penalty { house, resident } => {
            let penalty = chores.calculate_penalty(&house, &resident, now).await?;
            print(&json!({ "resident": resident, "penalty": penalty }))?
        }
        Commands::Activity { house, resident } => {
            print(&mirror.on_resident_activity(&house, &resident, now).await?)?
        }
    }

    mirror.storage().flush().await?;
    Ok(())
}
