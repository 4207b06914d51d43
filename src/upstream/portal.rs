use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, REFERER, USER_AGENT};

use super::{
    FIELD_CLIENT, FIELD_RANGE, Session, Upstream, UpstreamError, UpstreamResponse,
    parse_form_encoded,
};
use crate::config::PortalConfig;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(15);
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const ALLOCATE_TIMEOUT: Duration = Duration::from_secs(25);
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Mobile)";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
// The portal checks that form posts come from its own allocation page.
const LOGIN_REFERER_PATH: &str = "/index.php?opt=shw_allo";

pub struct PortalClient {
    config: PortalConfig,
}

impl PortalClient {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }

    fn build_http_client() -> Result<reqwest::Client, UpstreamError> {
        reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| UpstreamError::Client(e.to_string()))
    }

    async fn login(&self, http: &reqwest::Client) -> Result<(), UpstreamError> {
        let url = self.config.url(&self.config.login_path);
        let fields = parse_form_encoded(&self.config.login_form_raw);
        let resp = http
            .post(&url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(REFERER, self.config.url(LOGIN_REFERER_PATH))
            .form(&fields)
            .timeout(LOGIN_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UpstreamError::Transport {
                url,
                message: format!("login answered HTTP {}", status.as_u16()),
            });
        }
        Ok(())
    }

    async fn read(url: &str, resp: reqwest::Response) -> Result<UpstreamResponse, UpstreamError> {
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| transport(url, e))?;
        Ok(UpstreamResponse { status, body })
    }

    async fn get(
        &self,
        session: &Session,
        path: &str,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.config.url(path);
        let resp = session
            .http
            .get(&url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;
        Self::read(&url, resp).await
    }

    async fn post_listing_form(
        &self,
        session: &Session,
        fields: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.config.url(&self.config.all_path);
        let resp = session
            .http
            .post(&url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(REFERER, &url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .form(fields)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;
        Self::read(&url, resp).await
    }
}

fn transport(url: &str, err: reqwest::Error) -> UpstreamError {
    let message = if err.is_timeout() {
        "timed out".to_string()
    } else {
        err.to_string()
    };
    UpstreamError::Transport {
        url: url.to_string(),
        message,
    }
}

#[async_trait]
impl Upstream for PortalClient {
    async fn authenticate(&self) -> Result<Session, UpstreamError> {
        let http = Self::build_http_client()?;
        if self.config.login_form_raw.trim().is_empty() {
            tracing::info!("LOGIN_FORM_RAW not set, skipping portal login");
            return Ok(Session::anonymous(http));
        }
        match self.login(&http).await {
            Ok(()) => {
                tracing::info!("portal login attempted");
                Ok(Session {
                    http,
                    authenticated: true,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "portal login failed, continuing unauthenticated");
                Ok(Session::anonymous(http))
            }
        }
    }

    async fn fetch_listing(&self, session: &Session) -> Result<UpstreamResponse, UpstreamError> {
        self.get(session, &self.config.all_path).await
    }

    async fn fetch_ranges_for_client(
        &self,
        session: &Session,
        client_id: &str,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.post_listing_form(
            session,
            &[(FIELD_CLIENT, client_id), ("selected", "1")],
            FETCH_TIMEOUT,
        )
        .await
    }

    async fn submit_allocation(
        &self,
        session: &Session,
        client_id: &str,
        range_token: &str,
        quantity: u32,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let quantity = quantity.to_string();
        self.post_listing_form(
            session,
            &[
                ("quantity", quantity.as_str()),
                (FIELD_CLIENT, client_id),
                (FIELD_RANGE, range_token),
                ("allocate", "1"),
            ],
            ALLOCATE_TIMEOUT,
        )
        .await
    }

    async fn fetch_today_stats(
        &self,
        session: &Session,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.get(session, &self.config.today_path).await
    }
}
