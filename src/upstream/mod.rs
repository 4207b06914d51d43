//! HTTP access to the allocation portal.
//!
//! Every call returns the raw status and body; interpreting the page is the
//! extractor's job. Network failures surface as [`UpstreamError::Transport`].

mod form;
mod portal;
#[cfg(test)]
pub mod stub;

use async_trait::async_trait;

pub use form::parse_form_encoded;
pub use portal::PortalClient;

// Field names the portal's forms use.
pub const FIELD_CLIENT: &str = "selidd";
pub const FIELD_RANGE: &str = "selrng";

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("could not build HTTP client: {0}")]
    Client(String),
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: String,
}

impl UpstreamResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Cookie-carrying handle returned by [`Upstream::authenticate`].
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) http: reqwest::Client,
    pub authenticated: bool,
}

impl Session {
    /// A session that never logged in; the portal may still serve public pages.
    pub fn anonymous(http: reqwest::Client) -> Self {
        Self {
            http,
            authenticated: false,
        }
    }
}

#[async_trait]
pub trait Upstream: Send + Sync {
    /// Best effort: a failed login is logged and an anonymous session returned.
    async fn authenticate(&self) -> Result<Session, UpstreamError>;

    async fn fetch_listing(&self, session: &Session) -> Result<UpstreamResponse, UpstreamError>;

    async fn fetch_ranges_for_client(
        &self,
        session: &Session,
        client_id: &str,
    ) -> Result<UpstreamResponse, UpstreamError>;

    async fn submit_allocation(
        &self,
        session: &Session,
        client_id: &str,
        range_token: &str,
        quantity: u32,
    ) -> Result<UpstreamResponse, UpstreamError>;

    async fn fetch_today_stats(&self, session: &Session)
    -> Result<UpstreamResponse, UpstreamError>;
}
