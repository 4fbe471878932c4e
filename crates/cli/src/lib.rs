pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "alcoguard",
    about = "Alcoguard operator CLI",
    long_about = "Apply migrations, inspect configuration, analyze stored sessions and read the agent message log.",
    after_help = "Examples:\n  alcoguard migrate\n  alcoguard analyze --user u1 --session ses_123\n  alcoguard history --from guardian --type guardian.veto --limit 20"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Run the risk assessment for one stored drinking session")]
    Analyze {
        #[arg(long, help = "Owner of the session")]
        user: String,
        #[arg(long, help = "Session id, e.g. ses_...")]
        session: String,
    },
    #[command(about = "Show recent agent messages, newest first")]
    History {
        #[arg(long, help = "Only messages sent by this agent")]
        from: Option<String>,
        #[arg(long = "type", help = "Only messages of this event type, e.g. guardian.veto")]
        event_type: Option<String>,
        #[arg(long, default_value_t = commands::history::DEFAULT_LIMIT)]
        limit: usize,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Analyze { user, session } => commands::analyze::run(&user, &session),
        Command::History { from, event_type, limit } => {
            commands::history::run(from.as_deref(), event_type.as_deref(), limit)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
