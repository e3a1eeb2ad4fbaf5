use clap::{Args, Parser, Subcommand};
use selfreport::config::{AppConfig, ConfigError, Roster};
use selfreport::error::AppError;
use selfreport::notify::{LettreMailer, Notifier};
use selfreport::report;
use selfreport::schedule;
use selfreport::telemetry;
use selfreport::window::{self, ReportWindow};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "selfreport",
    about = "Submit the twice-daily campus health self-report for every account on the roster",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the unattended scheduler loop (default command)
    Watch(WatchArgs),
    /// Submit one report batch right now and print each outcome
    Run(RunArgs),
    /// Send a test message to verify the mail settings
    TestEmail(TestEmailArgs),
}

#[derive(Args, Debug, Default)]
struct WatchArgs {
    /// Override the configured roster file
    #[arg(long)]
    roster: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Submit for this account only instead of the whole roster
    #[arg(long)]
    account: Option<String>,
    /// Override the configured roster file
    #[arg(long)]
    roster: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct TestEmailArgs {
    /// Mailbox to send the test message to
    #[arg(long)]
    to: String,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Watch(WatchArgs::default()));

    match command {
        Command::Watch(args) => run_watch(args).await,
        Command::Run(args) => run_batch_now(args).await,
        Command::TestEmail(args) => run_mail_probe(args),
    }
}

async fn run_watch(mut args: WatchArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    let roster_override = args.roster.take();
    if let Some(path) = &roster_override {
        config.roster_path = path.clone();
    }

    telemetry::init(&config.telemetry)?;

    schedule::watch(config, roster_override).await;
    Ok(())
}

async fn run_batch_now(mut args: RunArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(path) = args.roster.take() {
        config.roster_path = path;
    }

    telemetry::init(&config.telemetry)?;

    let roster = Roster::from_path(&config.roster_path)?;
    let window = ReportWindow::at(window::portal_now(), &config.report.windows);

    match args.account {
        Some(id) => {
            let account = roster
                .find(&id)
                .ok_or(ConfigError::UnknownAccount { id })?;
            let outcome = report::submit_once(account, &window, config.report.temperature).await;
            println!(
                "{} {} report: {}",
                outcome.account_id,
                outcome.label,
                outcome.status()
            );
        }
        None => {
            let total = roster.len();
            for (position, account) in roster.accounts().iter().enumerate() {
                let outcome =
                    report::submit_once(account, &window, config.report.temperature).await;
                println!(
                    "{} {} report: {}",
                    outcome.account_id,
                    outcome.label,
                    outcome.status()
                );
                if position + 1 < total {
                    schedule::pause_between_accounts(schedule::TEST_PACE_SECS).await;
                }
            }
        }
    }

    Ok(())
}

fn run_mail_probe(args: TestEmailArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let mail = config.mail.ok_or(ConfigError::MailNotConfigured)?;
    let notifier = Notifier::new(LettreMailer::new(mail));
    notifier.probe(&args.to, config.report.send_email)?;

    println!("test message delivered to {}", args.to);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_the_watch_command() {
        let cli = Cli::parse_from(["selfreport"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn run_accepts_an_account_filter() {
        let cli = Cli::parse_from(["selfreport", "run", "--account", "21800001"]);
        match cli.command {
            Some(Command::Run(args)) => {
                assert_eq!(args.account.as_deref(), Some("21800001"));
                assert!(args.roster.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn watch_accepts_a_roster_override() {
        let cli = Cli::parse_from(["selfreport", "watch", "--roster", "people.csv"]);
        match cli.command {
            Some(Command::Watch(args)) => {
                assert_eq!(args.roster, Some(PathBuf::from("people.csv")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_email_requires_a_recipient() {
        let result = Cli::try_parse_from(["selfreport", "test-email"]);
        assert!(result.is_err());
    }
}
