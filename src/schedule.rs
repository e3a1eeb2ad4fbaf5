use crate::config::{AppConfig, Roster};
use crate::notify::{LettreMailer, Notifier};
use crate::report::{self, SubmissionOutcome};
use crate::window::{self, trigger_due, ReportWindow};
use chrono::NaiveDate;
use rand::Rng;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Watch-loop tick, also the settle sleep after a fired trigger so the
/// doubled trigger minute cannot re-fire it.
const TICK: Duration = Duration::from_secs(60);

/// Pause between accounts in the unattended loop.
pub const BATCH_PACE_SECS: RangeInclusive<u64> = 30..=60;

/// Shorter pause for the one-shot `run` command.
pub const TEST_PACE_SECS: RangeInclusive<u64> = 10..=20;

/// Per-day record of what ran, feeding the administrator digest.
#[derive(Debug)]
pub struct RunJournal {
    date: NaiveDate,
    lines: Vec<String>,
}

impl RunJournal {
    pub fn new(date: NaiveDate) -> Self {
        RunJournal {
            date,
            lines: Vec::new(),
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Drops the previous day's lines when the date rolls over.
    pub fn roll(&mut self, date: NaiveDate) {
        if self.date != date {
            self.date = date;
            self.lines.clear();
        }
    }

    pub fn record(&mut self, outcome: &SubmissionOutcome) {
        self.lines.push(format!(
            "{} {} report {} account {}",
            outcome.date,
            outcome.label,
            outcome.status(),
            outcome.account_id
        ));
    }

    pub fn record_note(&mut self, note: String) {
        self.lines.push(note);
    }

    pub fn digest(&self) -> String {
        if self.lines.is_empty() {
            "No report activity recorded today.".to_string()
        } else {
            self.lines.join("\n")
        }
    }
}

/// Uniformly random pause so the portal never sees a burst of sign-ins.
pub async fn pause_between_accounts(range: RangeInclusive<u64>) {
    let secs = rand::rng().random_range(range);
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

/// One sequential pass over the roster: fresh session per account, journal
/// every outcome, notify the account's mailbox when outcome mail is on.
pub async fn run_batch(config: &AppConfig, roster: &Roster, journal: &mut RunJournal) {
    let window = ReportWindow::at(window::portal_now(), &config.report.windows);
    let notifier = config
        .mail
        .clone()
        .filter(|_| config.report.send_email)
        .map(|mail| Notifier::new(LettreMailer::new(mail)));

    let total = roster.len();
    for (position, account) in roster.accounts().iter().enumerate() {
        let outcome = report::submit_once(account, &window, config.report.temperature).await;
        journal.record(&outcome);
        if let Some(notifier) = &notifier {
            notifier.notify(&outcome, std::slice::from_ref(&account.email_to));
        }
        if position + 1 < total {
            pause_between_accounts(BATCH_PACE_SECS).await;
        }
    }
}

/// The unattended loop: wakes every minute, fires report batches and the
/// administrator digest at their trigger windows, and takes a fresh
/// settings snapshot at the midnight rollover. Never returns.
pub async fn watch(initial: AppConfig, roster_override: Option<PathBuf>) {
    let mut config = initial;
    let mut journal = RunJournal::new(window::portal_now().date());

    info!(
        roster = %config.roster_path.display(),
        morning = %format!("{:02}:{:02}", config.report.windows.morning_hour, config.report.windows.morning_minute),
        night = %format!("{:02}:{:02}", config.report.windows.night_hour, config.report.windows.night_minute),
        outcome_mail = config.report.send_email,
        "watch loop started"
    );

    loop {
        let now = window::portal_now();

        if now.date() != journal.date() {
            journal.roll(now.date());
            match AppConfig::load() {
                Ok(mut fresh) => {
                    if let Some(path) = &roster_override {
                        fresh.roster_path = path.clone();
                    }
                    config = fresh;
                }
                Err(err) => {
                    error!(error = %err, "settings refresh failed, keeping previous snapshot")
                }
            }
        }

        if config.report.windows.report_due(now) {
            match Roster::from_path(&config.roster_path) {
                Ok(roster) if roster.is_empty() => {
                    warn!(roster = %config.roster_path.display(), "roster is empty, nothing to submit");
                    journal.record_note(format!("{} roster empty, nothing submitted", now.date()));
                }
                Ok(roster) => {
                    info!(accounts = roster.len(), "report window open, running batch");
                    run_batch(&config, &roster, &mut journal).await;
                }
                Err(err) => {
                    error!(error = %err, "roster load failed, batch skipped");
                    journal.record_note(format!("{} batch skipped: {err}", now.date()));
                }
            }
            tokio::time::sleep(TICK).await;
        }

        if config.admin.send_digest && trigger_due(now, config.admin.hour, config.admin.minute) {
            send_admin_digest(&config, &journal);
            tokio::time::sleep(TICK).await;
        }

        tokio::time::sleep(TICK).await;
    }
}

fn send_admin_digest(config: &AppConfig, journal: &RunJournal) {
    let Some(mail) = config.mail.clone() else {
        warn!("admin digest enabled but mail settings are incomplete");
        return;
    };
    let Some(to) = config.admin.email_to.as_deref() else {
        return;
    };
    let notifier = Notifier::new(LettreMailer::new(mail));
    let _ = notifier.send_digest(to, journal.date(), &journal.digest());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowLabel;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2022, 11, d).expect("valid date")
    }

    #[test]
    fn empty_journal_digest_says_so() {
        let journal = RunJournal::new(day(8));
        assert_eq!(journal.digest(), "No report activity recorded today.");
    }

    #[test]
    fn journal_lines_accumulate_in_order() {
        let mut journal = RunJournal::new(day(8));
        journal.record(&SubmissionOutcome {
            account_id: "21800001".to_string(),
            date: day(8),
            label: WindowLabel::Morning,
            success: true,
        });
        journal.record_note("2022-11-08 batch skipped: roster unreadable".to_string());

        let digest = journal.digest();
        let lines: Vec<&str> = digest.lines().collect();
        assert_eq!(
            lines[0],
            "2022-11-08 morning report success account 21800001"
        );
        assert_eq!(lines[1], "2022-11-08 batch skipped: roster unreadable");
    }

    #[test]
    fn journal_resets_on_date_rollover_only() {
        let mut journal = RunJournal::new(day(8));
        journal.record_note("something ran".to_string());

        journal.roll(day(8));
        assert!(journal.digest().contains("something ran"));

        journal.roll(day(9));
        assert_eq!(journal.date(), day(9));
        assert_eq!(journal.digest(), "No report activity recorded today.");
    }
}
