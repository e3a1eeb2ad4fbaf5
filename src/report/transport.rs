use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::redirect;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What a portal call answered: the final URL after any redirects plus the
/// body text.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub url: String,
    pub body: String,
}

#[derive(Debug)]
pub enum TransportError {
    /// Connect, timeout or IO failure somewhere on the wire.
    Network(String),
    /// The request could not even be constructed.
    Request(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network(detail) => write!(f, "network failure: {detail}"),
            TransportError::Request(detail) => write!(f, "request error: {detail}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransportError::Request(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Seam between the submit pipeline and the portal, so tests can script
/// responses and count calls.
#[async_trait]
pub trait PortalTransport: Send + Sync {
    /// GET following redirects, reporting the final URL.
    async fn get(&self, url: &str) -> Result<PageResponse, TransportError>;

    /// POST a form body following redirects (the SSO credential post).
    async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<PageResponse, TransportError>;

    /// POST the report form the way the FineUI frontend does: AJAX headers,
    /// redirects disabled.
    async fn post_report(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<PageResponse, TransportError>;
}

/// One sign-in session against the real portal: two clients over a shared
/// cookie jar, one following redirects for navigation and one with
/// redirects disabled for the final submission. Built fresh for each
/// submit call and dropped with it.
pub struct PortalClient {
    nav: reqwest::Client,
    form: reqwest::Client,
}

impl PortalClient {
    pub fn new() -> Result<Self, TransportError> {
        let jar = Arc::new(Jar::default());
        let nav = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let form = reqwest::Client::builder()
            .cookie_provider(jar)
            .timeout(REQUEST_TIMEOUT)
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(PortalClient { nav, form })
    }
}

#[async_trait]
impl PortalTransport for PortalClient {
    async fn get(&self, url: &str) -> Result<PageResponse, TransportError> {
        let response = self.nav.get(url).send().await?;
        let url = response.url().to_string();
        let body = response.text().await?;
        Ok(PageResponse { url, body })
    }

    async fn post_form(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<PageResponse, TransportError> {
        let response = self.nav.post(url).form(fields).send().await?;
        let url = response.url().to_string();
        let body = response.text().await?;
        Ok(PageResponse { url, body })
    }

    async fn post_report(
        &self,
        url: &str,
        fields: &[(String, String)],
    ) -> Result<PageResponse, TransportError> {
        let response = self
            .form
            .post(url)
            .header("X-Requested-With", "XMLHttpRequest")
            .header("X-FineUI-Ajax", "true")
            .form(fields)
            .send()
            .await?;
        let url = response.url().to_string();
        let body = response.text().await?;
        Ok(PageResponse { url, body })
    }
}
