use crate::config::MailConfig;
use crate::report::SubmissionOutcome;
use crate::retry::RetryPolicy;
use chrono::NaiveDate;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::fmt;
use tracing::{error, info};

/// Mail deliveries retry this many times after the initial attempt.
const MAX_MAIL_RETRIES: u32 = 5;

#[derive(Debug)]
pub enum MailError {
    /// A mailbox failed to parse.
    Address(String),
    /// The message itself could not be built.
    Message(String),
    /// SMTP conversation failure.
    Transport(String),
}

impl MailError {
    pub fn is_transient(&self) -> bool {
        matches!(self, MailError::Transport(_))
    }
}

impl fmt::Display for MailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailError::Address(detail) => write!(f, "invalid mailbox: {detail}"),
            MailError::Message(detail) => write!(f, "could not build message: {detail}"),
            MailError::Transport(detail) => write!(f, "smtp failure: {detail}"),
        }
    }
}

impl std::error::Error for MailError {}

impl From<lettre::address::AddressError> for MailError {
    fn from(err: lettre::address::AddressError) -> Self {
        MailError::Address(err.to_string())
    }
}

impl From<lettre::error::Error> for MailError {
    fn from(err: lettre::error::Error) -> Self {
        MailError::Message(err.to_string())
    }
}

impl From<lettre::transport::smtp::Error> for MailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        MailError::Transport(err.to_string())
    }
}

/// Delivery seam so tests can script SMTP behavior.
pub trait Mailer {
    fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), MailError>;
}

/// Real delivery: one authenticated SMTP conversation per call over
/// implicit TLS, closed when the transport drops.
pub struct LettreMailer {
    config: MailConfig,
}

impl LettreMailer {
    pub fn new(config: MailConfig) -> Self {
        LettreMailer { config }
    }
}

impl Mailer for LettreMailer {
    fn send(&self, to: &[String], subject: &str, body: &str) -> Result<(), MailError> {
        let mut builder = Message::builder().from(self.config.from.parse::<Mailbox>()?);
        for recipient in to {
            builder = builder.to(recipient.parse::<Mailbox>()?);
        }
        let message = builder.subject(subject).body(body.to_string())?;

        let transport = SmtpTransport::relay(&self.config.smtp_host)?
            .port(self.config.smtp_port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .build();
        transport.send(&message)?;
        Ok(())
    }
}

/// Outcome notification, mail probe, and administrator digest, all under
/// the shared retry policy.
pub struct Notifier<M: Mailer> {
    mailer: M,
    retry: RetryPolicy,
}

impl<M: Mailer> Notifier<M> {
    pub fn new(mailer: M) -> Self {
        Notifier {
            mailer,
            retry: RetryPolicy::new(MAX_MAIL_RETRIES),
        }
    }

    /// Best-effort outcome notification: transport failures are retried up
    /// to the bound, then logged and swallowed. Never disturbs the batch.
    pub fn notify(&self, outcome: &SubmissionOutcome, recipients: &[String]) {
        let subject = outcome_subject(outcome);
        let body = outcome_body(outcome);
        let _ = self.deliver(recipients, &subject, &body);
    }

    /// Mail settings probe. Unlike `notify`, the final error surfaces so
    /// the CLI can report it.
    pub fn probe(&self, to: &str, outcome_mail_enabled: bool) -> Result<(), MailError> {
        let body = if outcome_mail_enabled {
            "Mail settings are working. Outcome notification is enabled: every \
             half-day report will be confirmed to each account's mailbox."
        } else {
            "Mail settings are working, but outcome notification is currently \
             disabled. Set SELFREPORT_SEND_EMAIL=true to have each report \
             confirmed by email."
        };
        self.deliver(
            &[to.to_string()],
            "Self-report mail delivery test",
            body,
        )
    }

    /// Delivers the day's run journal to the administrator.
    pub fn send_digest(&self, to: &str, date: NaiveDate, journal: &str) -> Result<(), MailError> {
        let subject = format!("{date} self-report digest");
        self.deliver(&[to.to_string()], &subject, journal)
    }

    fn deliver(&self, to: &[String], subject: &str, body: &str) -> Result<(), MailError> {
        let result = self
            .retry
            .run_blocking(|| self.mailer.send(to, subject, body), MailError::is_transient);
        match &result {
            Ok(()) => info!(to = ?to, subject = %subject, "mail delivered"),
            Err(err) => {
                error!(to = ?to, subject = %subject, error = %err, "mail delivery failed")
            }
        }
        result
    }
}

pub fn outcome_subject(outcome: &SubmissionOutcome) -> String {
    format!(
        "{} {} report: {}",
        outcome.date,
        outcome.label,
        outcome.status()
    )
}

pub fn outcome_body(outcome: &SubmissionOutcome) -> String {
    if outcome.success {
        format!(
            "The {} report for {} was submitted successfully.",
            outcome.label, outcome.date
        )
    } else {
        format!(
            "The {} report for {} could not be submitted for account {}.\n\
             Please sign in to the portal and check whether it actually went through.\n\n\
             - If the portal shows the report as submitted, the server hiccupped after \
             accepting it; nothing to do.\n\
             - If the report is genuinely missing, the portal's login page or form \
             layout may have changed.\n\
             - The stored credentials for this account may also be wrong.\n\n\
             If it keeps failing, ask the administrator to check and update the program.\n",
            outcome.label, outcome.date, outcome.account_id
        )
    }
}
