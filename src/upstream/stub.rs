//! Scripted [`Upstream`] used by the engine, bulk and front-end tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use super::{Session, Upstream, UpstreamError, UpstreamResponse};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Authenticate,
    Listing,
    Ranges(String),
    Submit {
        client_id: String,
        range_token: String,
        quantity: u32,
    },
    Today,
}

#[derive(Clone)]
pub enum Scripted {
    Respond(u16, String),
    Fail(String),
}

impl Scripted {
    fn produce(&self, url: &str) -> Result<UpstreamResponse, UpstreamError> {
        match self {
            Self::Respond(status, body) => Ok(UpstreamResponse {
                status: *status,
                body: body.clone(),
            }),
            Self::Fail(message) => Err(UpstreamError::Transport {
                url: url.to_string(),
                message: message.clone(),
            }),
        }
    }
}

#[derive(Default)]
pub struct StubUpstream {
    pub calls: Arc<Mutex<Vec<Call>>>,
    listing: Option<Scripted>,
    today: Option<Scripted>,
    ranges: HashMap<String, Scripted>,
    /// Keyed by `client_id/range_token`.
    submissions: HashMap<String, Scripted>,
}

impl StubUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listing(mut self, body: &str) -> Self {
        self.listing = Some(Scripted::Respond(200, body.to_string()));
        self
    }

    pub fn with_unreachable_listing(mut self, message: &str) -> Self {
        self.listing = Some(Scripted::Fail(message.to_string()));
        self
    }

    pub fn with_today(mut self, body: &str) -> Self {
        self.today = Some(Scripted::Respond(200, body.to_string()));
        self
    }

    pub fn with_ranges(mut self, client_id: &str, body: &str) -> Self {
        self.ranges
            .insert(client_id.to_string(), Scripted::Respond(200, body.to_string()));
        self
    }

    pub fn with_submission(mut self, client_id: &str, range_token: &str, reply: Scripted) -> Self {
        self.submissions
            .insert(format!("{client_id}/{range_token}"), reply);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<(String, String, u32)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Submit {
                    client_id,
                    range_token,
                    quantity,
                } => Some((client_id, range_token, quantity)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn not_scripted(what: &str) -> Result<UpstreamResponse, UpstreamError> {
    Ok(UpstreamResponse {
        status: 404,
        body: format!("no script for {what}"),
    })
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn authenticate(&self) -> Result<Session, UpstreamError> {
        self.record(Call::Authenticate);
        Ok(Session::anonymous(reqwest::Client::new()))
    }

    async fn fetch_listing(&self, _session: &Session) -> Result<UpstreamResponse, UpstreamError> {
        self.record(Call::Listing);
        match &self.listing {
            Some(s) => s.produce("stub://listing"),
            None => not_scripted("listing"),
        }
    }

    async fn fetch_ranges_for_client(
        &self,
        _session: &Session,
        client_id: &str,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.record(Call::Ranges(client_id.to_string()));
        match self.ranges.get(client_id) {
            Some(s) => s.produce("stub://ranges"),
            None => not_scripted("ranges"),
        }
    }

    async fn submit_allocation(
        &self,
        _session: &Session,
        client_id: &str,
        range_token: &str,
        quantity: u32,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.record(Call::Submit {
            client_id: client_id.to_string(),
            range_token: range_token.to_string(),
            quantity,
        });
        // Unscripted pairs succeed with a plain fragment.
        match self.submissions.get(&format!("{client_id}/{range_token}")) {
            Some(s) => s.produce("stub://allocate"),
            None => Ok(UpstreamResponse {
                status: 200,
                body: "Numbers Allocated".to_string(),
            }),
        }
    }

    async fn fetch_today_stats(
        &self,
        _session: &Session,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.record(Call::Today);
        match &self.today {
            Some(s) => s.produce("stub://today"),
            None => not_scripted("today"),
        }
    }
}
