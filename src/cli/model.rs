use std::path::PathBuf;

use clap_derive::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file, defaults to `solarlink.*` in the working directory
    #[arg(long, short)]
    pub config: Option<String>,
    #[command(subcommand)]
    pub command: Option<CliCommands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommands {
    /// Poll the gateway and serve the dashboard (default)
    Serve,
    /// Print a day's log as a JSON array
    Dump(DumpArgs),
    /// Empty a day's log
    Purge(DateArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DumpArgs {
    /// YYYY_MM_DD, defaults to today
    #[arg(long)]
    pub date: Option<String>,
    /// Read a log file directly instead of the data directory
    #[arg(long, conflicts_with = "date")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct DateArgs {
    /// YYYY_MM_DD, defaults to today
    #[arg(long)]
    pub date: Option<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_parse() {
        let cli = Cli::try_parse_from(["solarlink"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.config, None);

        let args = ["solarlink", "-c", "my.toml", "dump", "--date", "2024_01_02"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.config.as_deref(), Some("my.toml"));
        assert_eq!(
            cli.command,
            Some(CliCommands::Dump(DumpArgs {
                date: Some("2024_01_02".to_string()),
                file: None,
            }))
        );

        let cli = Cli::try_parse_from(["solarlink", "purge"]).unwrap();
        assert_eq!(cli.command, Some(CliCommands::Purge(DateArgs { date: None })));
    }

    #[test]
    fn test_dump_date_conflicts_with_file() {
        let args = ["solarlink", "dump", "--date", "2024_01_02", "--file", "x.log"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
