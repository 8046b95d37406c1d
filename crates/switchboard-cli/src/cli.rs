use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use switchboard_routing::{InteractionMode, StrategyKind, UserFeedback};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "switchboard")]
#[command(about = "Adaptive multi-model LLM routing", long_about = None)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file (defaults to ~/.switchboard/config.toml)")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Request text plus the caller's routing overrides.
#[derive(Debug, Args)]
pub struct RequestArgs {
    #[arg(help = "The request to route")]
    pub text: String,

    #[arg(short, long, help = "Path of the file the request is about")]
    pub file: Option<String>,

    #[arg(short, long, help = "Strategy to use instead of the highest-priority enabled one")]
    pub strategy: Option<StrategyKind>,

    #[arg(long, help = "Model to use when it is in the catalog")]
    pub model: Option<String>,

    #[arg(long, help = "Interaction mode: learning, code-review or expert")]
    pub mode: Option<InteractionMode>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Route a request and print the decision as JSON")]
    Route(RequestArgs),

    #[command(about = "Route and execute a request")]
    Run {
        #[command(flatten)]
        request: RequestArgs,

        #[arg(long, help = "Print the full execution result as JSON")]
        json: bool,
    },

    #[command(about = "Report the outcome of an earlier decision")]
    Feedback {
        #[arg(help = "Decision id printed by route or run")]
        id: Uuid,

        #[arg(short, long, help = "Response quality between 0 and 1")]
        quality: f64,

        #[arg(long, help = "positive, neutral or negative")]
        feedback: Option<UserFeedback>,

        #[arg(long, default_value_t = 0)]
        latency_ms: u64,

        #[arg(long, default_value_t = 0)]
        tokens: u64,

        #[arg(long, help = "The response was an error")]
        error: bool,

        #[arg(long, default_value_t = 0, requires = "error")]
        retries: u32,
    },

    #[command(about = "Show aggregate performance from the ledger")]
    Stats {
        #[arg(long, conflicts_with = "model")]
        strategy: Option<StrategyKind>,

        #[arg(long)]
        model: Option<String>,
    },

    #[command(about = "Show configuration")]
    Config {
        #[arg(long, help = "Only print the config file path")]
        path: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(error) => panic!("failed to parse {args:?}: {error}"),
        }
    }

    #[test]
    fn test_route_arguments() {
        let cli = parse(&["switchboard", "route", "fix this", "--strategy", "Quality", "-f", "src/lib.rs"]);
        match cli.command {
            Commands::Route(request) => {
                assert_eq!(request.text, "fix this");
                assert_eq!(request.strategy, Some(StrategyKind::Quality));
                assert_eq!(request.file.as_deref(), Some("src/lib.rs"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_feedback_arguments() {
        let id = Uuid::new_v4().to_string();
        let cli = parse(&["switchboard", "feedback", &id, "--quality", "0.8", "--feedback", "up"]);
        assert!(matches!(
            cli.command,
            Commands::Feedback { feedback: Some(UserFeedback::Positive), error: false, .. }
        ));
    }

    #[test]
    fn test_rejects_unknown_strategy() {
        let unknown = Cli::try_parse_from(["switchboard", "route", "q", "--strategy", "fastest"]);
        assert!(matches!(unknown, Err(_)));
        let conflicting = Cli::try_parse_from(["switchboard", "stats", "--strategy", "cost", "--model", "m"]);
        assert!(matches!(conflicting, Err(_)));
    }
}
