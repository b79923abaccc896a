//! Command line parsing
//!
//! ```text
//! nof1_tracker [--once | --continuous] [--interval <minutes>] [--max-models <n>] [--verbose]
//! nof1_tracker season show
//! nof1_tracker season transition <label>
//! ```

use std::time::Duration;

pub const HELP: &str = "\
nof1_tracker: collect NOF1 competition data into a local store

USAGE:
    nof1_tracker [OPTIONS]
    nof1_tracker season show
    nof1_tracker season transition <label>

OPTIONS:
    --once                  Run a single collection cycle (default)
    --continuous            Run cycles until interrupted
    --interval <minutes>    Minutes between cycles in continuous mode
    --max-models <n>        Maximum number of tracked models
    -v, --verbose           Debug logging
    -h, --help              Print this help

Configuration is read from the environment (and .env): DATABASE_URL,
SCRAPER_BASE_URL, SCRAPER_RATE_LIMIT, REFRESH_INTERVAL, MAX_MODELS, ...";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// One cycle, then exit
    Once,
    /// Cycles on an interval until shutdown
    Continuous,
    SeasonShow,
    SeasonTransition { label: String },
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cli {
    pub command: Command,
    pub interval: Option<Duration>,
    pub max_models: Option<usize>,
    pub verbose: bool,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            command: Command::Once,
            interval: None,
            max_models: None,
            verbose: false,
        }
    }
}

pub fn parse_args<I>(args: I) -> Result<Cli, String>
where
    I: IntoIterator<Item = String>,
{
    let mut cli = Cli::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--once" => cli.command = Command::Once,
            "--continuous" => cli.command = Command::Continuous,
            "--interval" => {
                let v = args.next().ok_or("Missing value for --interval")?;
                let minutes: u64 = v
                    .parse()
                    .map_err(|_| format!("Invalid --interval: {}", v))?;
                if minutes == 0 {
                    return Err("--interval must be at least 1 minute".to_string());
                }
                cli.interval = Some(Duration::from_secs(minutes * 60));
            }
            "--max-models" => {
                let v = args.next().ok_or("Missing value for --max-models")?;
                let n: usize = v
                    .parse()
                    .map_err(|_| format!("Invalid --max-models: {}", v))?;
                if n == 0 {
                    return Err("--max-models must be at least 1".to_string());
                }
                cli.max_models = Some(n);
            }
            "-v" | "--verbose" => cli.verbose = true,
            "-h" | "--help" => cli.command = Command::Help,
            "season" => {
                let sub = args.next().ok_or("Missing season subcommand (show | transition)")?;
                cli.command = match sub.as_str() {
                    "show" => Command::SeasonShow,
                    "transition" => {
                        let label = args.next().ok_or("Missing label for season transition")?;
                        let label = label.trim();
                        if label.is_empty() {
                            return Err("Season label cannot be empty".to_string());
                        }
                        Command::SeasonTransition {
                            label: label.to_string(),
                        }
                    }
                    other => return Err(format!("Unknown season subcommand: {}", other)),
                };
            }
            _ => return Err(format!("Unknown arg: {}", arg)),
        }
    }

    Ok(cli)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, String> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_defaults_to_single_cycle() {
        assert_eq!(parse(&[]).unwrap(), Cli::default());
    }

    #[test]
    fn test_continuous_with_overrides() {
        let cli = parse(&["--continuous", "--interval", "5", "--max-models", "3", "-v"]).unwrap();
        assert_eq!(cli.command, Command::Continuous);
        assert_eq!(cli.interval, Some(Duration::from_secs(300)));
        assert_eq!(cli.max_models, Some(3));
        assert!(cli.verbose);
    }

    #[test]
    fn test_season_commands() {
        assert_eq!(parse(&["season", "show"]).unwrap().command, Command::SeasonShow);
        assert_eq!(
            parse(&["season", "transition", "2"]).unwrap().command,
            Command::SeasonTransition {
                label: "2".to_string()
            }
        );
        assert!(parse(&["season", "transition"]).is_err());
        assert!(parse(&["season", "delete"]).is_err());
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse(&["--interval", "0"]).is_err());
        assert!(parse(&["--interval", "soon"]).is_err());
        assert!(parse(&["--max-models"]).is_err());
        assert!(parse(&["--headless"]).is_err());
    }
}
