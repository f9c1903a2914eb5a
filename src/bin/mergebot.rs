//! mergebot CLI: one helpdesk housekeeping pass per invocation.

use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use mergebot_rs::adapter::{TicketFilter, ZendeskClient};
use mergebot_rs::cluster::SubjectNormalizer;
use mergebot_rs::config::Config;
use mergebot_rs::config::policy::Policy;
use mergebot_rs::engine::{Engine, EngineConfig};
use mergebot_rs::error::Error;
use mergebot_rs::model::RunResult;
use mergebot_rs::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mergebot", about = "Helpdesk duplicate merging and escalation propagation")]
struct Cli {
    /// TOML job policy (overrides POLICY_FILE)
    #[arg(long, global = true)]
    policy: Option<PathBuf>,
    /// Log writes instead of sending them (overrides DRY_RUN)
    #[arg(long, global = true)]
    dry_run: Option<bool>,
    /// Maximum write actions this run (overrides MAX_ACTIONS)
    #[arg(long, global = true)]
    max_actions: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check credentials and connectivity
    Check,
    /// Merge duplicate tickets created in the lookback window
    MergeTickets {
        /// Hours of tickets to consider
        #[arg(long)]
        lookback_hours: Option<u32>,
        /// Channel to leave alone (repeatable; replaces the policy list)
        #[arg(long = "exclude-channel")]
        exclude_channels: Vec<String>,
        /// Requester organisation domain to leave alone (repeatable)
        #[arg(long = "exclude-domain")]
        exclude_domains: Vec<String>,
        /// Subject normalisation: basic or strip_prefixes
        #[arg(long, value_parser = parse_normalizer)]
        normalizer: Option<SubjectNormalizer>,
    },
    /// Copy the escalation reason from parents to side-conversation children
    Propagate {
        /// Saved view listing the children
        #[arg(long)]
        view: Option<u64>,
        /// Custom field holding the escalation reason
        #[arg(long)]
        field: Option<u64>,
        /// How far back the reverse parent search reaches
        #[arg(long)]
        reverse_search_days: Option<u32>,
    },
    /// Merge duplicate end users among recent requesters
    MergeUsers {
        /// Solved-ticket window in minutes
        #[arg(long)]
        window_minutes: Option<u32>,
    },
}

fn parse_normalizer(value: &str) -> Result<SubjectNormalizer, String> {
    match value {
        "basic" => Ok(SubjectNormalizer::Basic),
        "strip_prefixes" | "strip-prefixes" => Ok(SubjectNormalizer::StripPrefixes),
        other => Err(format!("unknown normalizer {other:?} (basic | strip_prefixes)")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "mergebot".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let client = ZendeskClient::new(&config)?;
    if let Command::Check = cli.command {
        client.preflight().await?;
        println!("connected to {}", config.host);
        return Ok(());
    }

    let policy_path = cli.policy.clone().or_else(|| config.policy_file.clone());
    let mut policy = Policy::load_optional(policy_path.as_deref())?;
    let engine = Engine::new(
        Arc::new(client),
        EngineConfig {
            dry_run: cli.dry_run.unwrap_or(config.dry_run),
            max_actions: cli.max_actions.unwrap_or(config.max_actions),
        },
    );

    let outcome = match cli.command {
        Command::Check => return Ok(()),
        Command::MergeTickets {
            lookback_hours,
            exclude_channels,
            exclude_domains,
            normalizer,
        } => {
            let merge = &mut policy.merge;
            if let Some(hours) = lookback_hours {
                merge.lookback_hours = hours;
            }
            if !exclude_channels.is_empty() {
                merge.excluded_channels = exclude_channels.into_iter().collect();
            }
            if !exclude_domains.is_empty() {
                merge.excluded_org_domains = exclude_domains.into_iter().collect();
            }
            if let Some(normalizer) = normalizer {
                merge.subject_normalizer = normalizer;
            }
            let since = Utc::now() - Duration::hours(i64::from(merge.lookback_hours));
            engine
                .run_merge_pass(
                    &TicketFilter::unsolved_since(since),
                    &merge.exclusions(),
                    merge.subject_normalizer,
                )
                .await
        }
        Command::Propagate {
            view,
            field,
            reverse_search_days,
        } => {
            let propagation = &mut policy.propagation;
            if field.is_some() {
                propagation.field_id = field;
            }
            if let Some(days) = reverse_search_days {
                propagation.reverse_search_days = days;
            }
            let view = view
                .or(propagation.view_id)
                .ok_or_else(|| Error::Config("propagation needs a view id".to_string()))?;
            engine.run_field_propagation_pass(view, propagation).await
        }
        Command::MergeUsers { window_minutes } => {
            let window = window_minutes.unwrap_or(policy.users.window_minutes);
            engine.run_user_merge_pass(window).await
        }
    };

    report(outcome)
}

/// Print the summary; an empty batch is a normal, quiet exit.
fn report(outcome: mergebot_rs::error::Result<RunResult>) -> anyhow::Result<()> {
    match outcome {
        Ok(result) => {
            println!("{result}");
            Ok(())
        }
        Err(Error::EmptyBatch(reason)) => {
            tracing::info!(%reason, "nothing to do");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
