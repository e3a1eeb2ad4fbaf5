use crate::window::ReportWindows;
use serde::Deserialize;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Immutable settings snapshot. The watch loop takes a fresh one at the
/// midnight rollover and hands it down; nothing mutates a snapshot after
/// `load` returns.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub report: ReportConfig,
    pub mail: Option<MailConfig>,
    pub admin: AdminConfig,
    pub roster_path: PathBuf,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub windows: ReportWindows,
    /// Baseline body temperature; each submission jitters around it.
    pub temperature: f64,
    /// Whether to mail users their outcomes. Forced off when the mail
    /// settings are incomplete.
    pub send_email: bool,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub send_digest: bool,
    pub email_to: Option<String>,
    pub hour: u32,
    pub minute: u32,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    Invalid { name: &'static str, value: String },
    MailNotConfigured,
    Roster { path: PathBuf, source: csv::Error },
    UnknownAccount { id: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { name, value } => {
                write!(f, "{name} has unusable value '{value}'")
            }
            ConfigError::MailNotConfigured => write!(
                f,
                "mail settings are incomplete; set SELFREPORT_SMTP_HOST, \
                 SELFREPORT_SMTP_USERNAME, SELFREPORT_SMTP_PASSWORD and SELFREPORT_MAIL_FROM"
            ),
            ConfigError::Roster { path, source } => {
                write!(f, "failed to read roster {}: {source}", path.display())
            }
            ConfigError::UnknownAccount { id } => {
                write!(f, "account '{id}' is not present in the roster")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Roster { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl AppConfig {
    /// Reads `.env` (file values win, so edits land on the midnight
    /// refresh) and builds a snapshot from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv_override().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Snapshot from an arbitrary variable lookup. Out-of-range values are
    /// silently corrected to the documented fallbacks; unparseable values
    /// are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let windows = ReportWindows {
            morning_hour: corrected(env_u32(&lookup, "SELFREPORT_MORNING_HOUR")?, 6, 20, 7),
            morning_minute: corrected(env_u32(&lookup, "SELFREPORT_MORNING_MINUTE")?, 0, 59, 30),
            night_hour: corrected(env_u32(&lookup, "SELFREPORT_NIGHT_HOUR")?, 19, 23, 20),
            night_minute: corrected(env_u32(&lookup, "SELFREPORT_NIGHT_MINUTE")?, 0, 59, 30),
        };

        let temperature = match lookup("SELFREPORT_TEMPERATURE") {
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| ConfigError::Invalid {
                name: "SELFREPORT_TEMPERATURE",
                value: raw,
            })?,
            None => 36.5,
        };
        let temperature = if (35.0..37.3).contains(&temperature) {
            temperature
        } else {
            36.5
        };

        let smtp_port = match lookup("SELFREPORT_SMTP_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "SELFREPORT_SMTP_PORT",
                value: raw,
            })?,
            None => 465,
        };
        let mail = match (
            env_string(&lookup, "SELFREPORT_SMTP_HOST"),
            env_string(&lookup, "SELFREPORT_SMTP_USERNAME"),
            env_string(&lookup, "SELFREPORT_SMTP_PASSWORD"),
            env_string(&lookup, "SELFREPORT_MAIL_FROM"),
        ) {
            (Some(smtp_host), Some(username), Some(password), Some(from)) => Some(MailConfig {
                smtp_host,
                smtp_port,
                username,
                password,
                from,
            }),
            _ => None,
        };

        let send_email =
            env_bool(&lookup, "SELFREPORT_SEND_EMAIL", true)? && mail.is_some();

        let admin_email = env_string(&lookup, "SELFREPORT_ADMIN_EMAIL");
        let admin = AdminConfig {
            send_digest: env_bool(&lookup, "SELFREPORT_ADMIN_DIGEST", false)?
                && admin_email.is_some(),
            email_to: admin_email,
            hour: corrected(env_u32(&lookup, "SELFREPORT_ADMIN_HOUR")?, 0, 23, 22),
            minute: corrected(env_u32(&lookup, "SELFREPORT_ADMIN_MINUTE")?, 0, 59, 30),
        };

        let roster_path = lookup("SELFREPORT_ROSTER")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("accounts.csv"));

        let telemetry = TelemetryConfig {
            log_level: env_string(&lookup, "SELFREPORT_LOG_LEVEL")
                .unwrap_or_else(|| "info".to_string()),
        };

        Ok(AppConfig {
            report: ReportConfig {
                windows,
                temperature,
                send_email,
            },
            mail,
            admin,
            roster_path,
            telemetry,
        })
    }
}

fn env_u32<F>(lookup: &F, name: &'static str) -> Result<Option<u32>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(None),
    }
}

fn env_bool<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<bool>()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => Ok(default),
    }
}

fn env_string<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn corrected(value: Option<u32>, min: u32, max: u32, fallback: u32) -> u32 {
    match value {
        Some(v) if v >= min && v <= max => v,
        _ => fallback,
    }
}

/// One roster row: portal credentials plus the profile values the form
/// needs and the mailbox to notify.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub id: String,
    pub password: String,
    pub campus: String,
    pub county: String,
    pub address: String,
    pub email_to: String,
}

#[derive(Debug, Clone)]
pub struct Roster {
    accounts: Vec<Account>,
}

impl Roster {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut reader = csv::Reader::from_path(path).map_err(|source| ConfigError::Roster {
            path: path.to_path_buf(),
            source,
        })?;
        let accounts = reader
            .deserialize()
            .collect::<Result<Vec<Account>, csv::Error>>()
            .map_err(|source| ConfigError::Roster {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Roster { accounts })
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, csv::Error> {
        let accounts = csv::Reader::from_reader(reader)
            .deserialize()
            .collect::<Result<Vec<Account>, csv::Error>>()?;
        Ok(Roster { accounts })
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn find(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|account| account.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn lookup(pairs: Vec<(&'static str, &'static str)>) -> impl Fn(&str) -> Option<String> {
        move |name| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn empty_environment_yields_documented_defaults() {
        let config = AppConfig::from_lookup(|_| None).expect("defaults load");

        assert_eq!(config.report.windows.morning_hour, 7);
        assert_eq!(config.report.windows.morning_minute, 30);
        assert_eq!(config.report.windows.night_hour, 20);
        assert_eq!(config.report.windows.night_minute, 30);
        assert_eq!(config.report.temperature, 36.5);
        assert!(!config.report.send_email, "no mail settings, so no mail");
        assert!(config.mail.is_none());
        assert!(!config.admin.send_digest);
        assert_eq!(config.roster_path, PathBuf::from("accounts.csv"));
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn out_of_range_values_fall_back_silently() {
        let config = AppConfig::from_lookup(lookup(vec![
            ("SELFREPORT_MORNING_HOUR", "23"),
            ("SELFREPORT_MORNING_MINUTE", "75"),
            ("SELFREPORT_NIGHT_HOUR", "2"),
            ("SELFREPORT_TEMPERATURE", "39.0"),
            ("SELFREPORT_ADMIN_HOUR", "99"),
        ]))
        .expect("corrected load");

        assert_eq!(config.report.windows.morning_hour, 7);
        assert_eq!(config.report.windows.morning_minute, 30);
        assert_eq!(config.report.windows.night_hour, 20);
        assert_eq!(config.report.temperature, 36.5);
        assert_eq!(config.admin.hour, 22);
    }

    #[test]
    fn in_range_values_are_kept() {
        let config = AppConfig::from_lookup(lookup(vec![
            ("SELFREPORT_MORNING_HOUR", "6"),
            ("SELFREPORT_MORNING_MINUTE", "0"),
            ("SELFREPORT_NIGHT_HOUR", "23"),
            ("SELFREPORT_NIGHT_MINUTE", "59"),
            ("SELFREPORT_TEMPERATURE", "35.0"),
        ]))
        .expect("load");

        assert_eq!(config.report.windows.morning_hour, 6);
        assert_eq!(config.report.windows.morning_minute, 0);
        assert_eq!(config.report.windows.night_hour, 23);
        assert_eq!(config.report.windows.night_minute, 59);
        assert_eq!(config.report.temperature, 35.0);
    }

    #[test]
    fn unparseable_value_is_an_error() {
        let err = AppConfig::from_lookup(lookup(vec![("SELFREPORT_MORNING_HOUR", "late")]))
            .expect_err("parse failure surfaces");

        match err {
            ConfigError::Invalid { name, value } => {
                assert_eq!(name, "SELFREPORT_MORNING_HOUR");
                assert_eq!(value, "late");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn incomplete_mail_settings_force_outcome_mail_off() {
        let config = AppConfig::from_lookup(lookup(vec![
            ("SELFREPORT_SEND_EMAIL", "true"),
            ("SELFREPORT_SMTP_HOST", "smtp.example.edu"),
            ("SELFREPORT_SMTP_USERNAME", "robot"),
        ]))
        .expect("load");

        assert!(config.mail.is_none());
        assert!(!config.report.send_email);
    }

    #[test]
    fn complete_mail_settings_enable_outcome_mail() {
        let config = AppConfig::from_lookup(lookup(vec![
            ("SELFREPORT_SMTP_HOST", "smtp.example.edu"),
            ("SELFREPORT_SMTP_USERNAME", "robot"),
            ("SELFREPORT_SMTP_PASSWORD", "hunter2"),
            ("SELFREPORT_MAIL_FROM", "robot@example.edu"),
        ]))
        .expect("load");

        let mail = config.mail.expect("mail configured");
        assert_eq!(mail.smtp_port, 465, "implicit TLS port by default");
        assert!(config.report.send_email);
    }

    #[test]
    fn admin_digest_requires_a_recipient() {
        let without = AppConfig::from_lookup(lookup(vec![("SELFREPORT_ADMIN_DIGEST", "true")]))
            .expect("load");
        assert!(!without.admin.send_digest);

        let with = AppConfig::from_lookup(lookup(vec![
            ("SELFREPORT_ADMIN_DIGEST", "true"),
            ("SELFREPORT_ADMIN_EMAIL", "ops@example.edu"),
        ]))
        .expect("load");
        assert!(with.admin.send_digest);
        assert_eq!(with.admin.email_to.as_deref(), Some("ops@example.edu"));
    }

    #[test]
    fn roster_parses_accounts_and_finds_by_id() {
        let csv = "id,password,campus,county,address,email_to\n\
                   21800001,secret-a,宝山,宝山区,上大路99号,a@example.edu\n\
                   21800002,secret-b,嘉定,嘉定区,城中路20号,b@example.edu\n";
        let roster = Roster::from_reader(csv.as_bytes()).expect("roster parses");

        assert_eq!(roster.len(), 2);
        let second = roster.find("21800002").expect("second account present");
        assert_eq!(second.campus, "嘉定");
        assert_eq!(second.email_to, "b@example.edu");
        assert!(roster.find("21809999").is_none());
    }

    #[test]
    fn roster_from_path_reports_the_path_on_failure() {
        let missing = Path::new("/nonexistent/roster.csv");
        let err = Roster::from_path(missing).expect_err("missing file fails");
        assert!(err.to_string().contains("/nonexistent/roster.csv"));
    }

    #[test]
    fn roster_from_path_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp roster");
        writeln!(file, "id,password,campus,county,address,email_to").expect("header");
        writeln!(file, "21800003,secret-c,延长,静安区,延长路149号,c@example.edu")
            .expect("row");

        let roster = Roster::from_path(file.path()).expect("roster loads");
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.accounts()[0].county, "静安区");
    }
}
