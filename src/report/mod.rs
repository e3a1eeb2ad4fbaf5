pub mod form;
pub mod transport;

use crate::config::Account;
use crate::retry::RetryPolicy;
use crate::window::{ReportWindow, WindowLabel};
use chrono::NaiveDate;
use form::ReportForm;
use scraper::{Html, Selector};
use tracing::{error, info, warn};
use transport::{PortalClient, PortalTransport, TransportError};

/// Network phases retry this many times after the initial attempt.
const MAX_NETWORK_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub account_id: String,
    pub date: NaiveDate,
    pub label: WindowLabel,
    pub success: bool,
}

impl SubmissionOutcome {
    fn new(account: &Account, window: &ReportWindow, success: bool) -> Self {
        SubmissionOutcome {
            account_id: account.id.clone(),
            date: window.date,
            label: window.label,
            success,
        }
    }

    pub fn status(&self) -> &'static str {
        if self.success {
            "success"
        } else {
            "failure"
        }
    }
}

/// Submits one half-day report for one account. Never returns an error:
/// every failure mode is logged and folded into the outcome.
pub async fn submit(
    transport: &dyn PortalTransport,
    account: &Account,
    window: &ReportWindow,
    temperature_baseline: f64,
) -> SubmissionOutcome {
    let retry = RetryPolicy::new(MAX_NETWORK_RETRIES);

    if let Err(err) = retry
        .run(|| sign_in(transport, account), TransportError::is_transient)
        .await
    {
        error!(account = %account.id, error = %err, "portal sign-in failed");
        return SubmissionOutcome::new(account, window, false);
    }

    let url = form::report_page_url(window);
    let page = match retry
        .run(|| transport.get(&url), TransportError::is_transient)
        .await
    {
        Ok(page) => page,
        Err(err) => {
            error!(account = %account.id, url = %url, error = %err, "report form fetch failed");
            return SubmissionOutcome::new(account, window, false);
        }
    };

    let Some(view_state) = hidden_field(&page.body, form::VIEW_STATE_FIELD) else {
        // bounced back to a login page; retrying cannot help and the final
        // POST must not go out
        error!(account = %account.id, "portal rejected the session, view-state token missing");
        return SubmissionOutcome::new(account, window, false);
    };

    let temperature = form::jittered_temperature(temperature_baseline, &mut rand::rng());
    let report = ReportForm::new(account, window, view_state, temperature);

    // one POST, never retried: the portal may already have accepted a
    // submission whose response was lost, and re-posting would double-submit
    let response = match transport.post_report(&url, &report.fields()).await {
        Ok(response) => response,
        Err(err) => {
            error!(account = %account.id, error = %err, "report submission failed");
            return SubmissionOutcome::new(account, window, false);
        }
    };

    let success = response.body.contains(form::SUCCESS_MARKER);
    if success {
        info!(account = %account.id, window = %window.label, "report submitted");
    } else {
        warn!(account = %account.id, window = %window.label, "portal rejected the report");
    }
    SubmissionOutcome::new(account, window, success)
}

/// Submit over a fresh real session; the cookie state lives exactly as
/// long as this call.
pub async fn submit_once(
    account: &Account,
    window: &ReportWindow,
    temperature_baseline: f64,
) -> SubmissionOutcome {
    match PortalClient::new() {
        Ok(session) => submit(&session, account, window, temperature_baseline).await,
        Err(err) => {
            error!(account = %account.id, error = %err, "could not build portal session");
            SubmissionOutcome::new(account, window, false)
        }
    }
}

/// The SSO handshake, one retryable unit: land on the login form, post
/// credentials to wherever the redirects ended up, then touch the OAuth
/// authorize endpoint to finish the cookie exchange.
async fn sign_in(
    transport: &dyn PortalTransport,
    account: &Account,
) -> Result<(), TransportError> {
    let login_page = transport.get(form::DEFAULT_PAGE_URL).await?;
    transport
        .post_form(&login_page.url, &credential_fields(account))
        .await?;
    transport.get(form::SSO_AUTHORIZE_URL).await?;
    Ok(())
}

fn credential_fields(account: &Account) -> Vec<(String, String)> {
    vec![
        ("username".to_string(), account.id.clone()),
        ("password".to_string(), account.password.clone()),
    ]
}

/// Value of a named `<input>` in the fetched form page, if present.
fn hidden_field(body: &str, name: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let inputs = Selector::parse("input").ok()?;
    document
        .select(&inputs)
        .find(|input| input.value().attr("name") == Some(name))
        .and_then(|input| input.value().attr("value"))
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORM_PAGE: &str = r#"<html><body><form>
        <input type="hidden" name="__VIEWSTATEGENERATOR" value="DC4D08A3"/>
        <input type="hidden" name="__VIEWSTATE" value="dDwtMTIzNDU2Nzg5O0p9"/>
        <input type="text" name="p1$TiWen" value=""/>
    </form></body></html>"#;

    #[test]
    fn hidden_field_reads_the_named_input() {
        let token = hidden_field(FORM_PAGE, "__VIEWSTATE").expect("token present");
        assert_eq!(token, "dDwtMTIzNDU2Nzg5O0p9");
    }

    #[test]
    fn hidden_field_distinguishes_names() {
        let generator = hidden_field(FORM_PAGE, "__VIEWSTATEGENERATOR").expect("generator");
        assert_eq!(generator, "DC4D08A3");
    }

    #[test]
    fn hidden_field_is_none_on_a_login_page() {
        let login = r#"<html><body><form>
            <input name="username"/><input name="password" type="password"/>
        </form></body></html>"#;
        assert!(hidden_field(login, "__VIEWSTATE").is_none());
    }

    #[test]
    fn credential_fields_carry_id_and_password() {
        let account = Account {
            id: "21800001".to_string(),
            password: "secret".to_string(),
            campus: "宝山".to_string(),
            county: "宝山区".to_string(),
            address: "上大路99号".to_string(),
            email_to: "a@example.edu".to_string(),
        };

        let fields = credential_fields(&account);
        assert_eq!(fields[0], ("username".to_string(), "21800001".to_string()));
        assert_eq!(fields[1], ("password".to_string(), "secret".to_string()));
    }
}
