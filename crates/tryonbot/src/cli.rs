use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tryonbot")]
#[command(author, version, about = "Telegram virtual try-on bot", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bot in normal mode
    Run {
        /// Do not start the HTTP control surface
        #[arg(long)]
        no_web: bool,
    },

    /// Run the bot in staging mode (loads .env.staging)
    RunStaging {
        /// Do not start the HTTP control surface
        #[arg(long)]
        no_web: bool,
    },

    /// Apply pending database migrations and exit
    Migrate,

    /// Print the analytics report as JSON
    Report {
        /// today, yesterday, 7d, 30d, 90d or all
        #[arg(short, long, default_value = "7d")]
        filter: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from(["tryonbot", "run", "--no-web"]).expect("parse");
        assert!(matches!(cli.command, Some(Commands::Run { no_web: true })));
    }

    #[test]
    fn test_report_filter_defaults_to_week() {
        let cli = Cli::try_parse_from(["tryonbot", "report"]).expect("parse");
        match cli.command {
            Some(Commands::Report { filter }) => assert_eq!(filter, "7d"),
            _ => panic!("expected report"),
        }
    }

    #[test]
    fn test_no_command_is_allowed() {
        let cli = Cli::try_parse_from(["tryonbot"]).expect("parse");
        assert!(cli.command.is_none());
    }
}
