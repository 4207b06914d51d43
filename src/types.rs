use std::fmt;

use chrono::{DateTime, Utc};

/// Conversation identifier as issued by the chat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an outgoing message can go: a numeric chat or a public `@channel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Chat(ChatId),
    Channel(String),
}

impl Recipient {
    /// Numeric ids and `@name` usernames; anything else is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(id) = raw.parse::<i64>() {
            return Some(Self::Chat(ChatId(id)));
        }
        match raw.strip_prefix('@') {
            Some(name)
                if !name.is_empty()
                    && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') =>
            {
                Some(Self::Channel(raw.to_string()))
            }
            _ => None,
        }
    }
}

impl From<ChatId> for Recipient {
    fn from(chat: ChatId) -> Self {
        Self::Chat(chat)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chat(chat) => write!(f, "{chat}"),
            Self::Channel(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub name: String,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Range {
    pub label: String,
    /// Allocation handle scraped from the row's hidden `selrng` field.
    /// Empty when the range is informational only.
    pub token: String,
    pub all: u64,
    pub free: u64,
    pub allocated: u64,
}

impl Range {
    pub fn allocatable(&self) -> bool {
        !self.token.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Manual,
    BulkCsv,
    MultiSelect,
}

impl Origin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::BulkCsv => "bulk-csv",
            Self::MultiSelect => "multi-select",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "manual" => Some(Self::Manual),
            "bulk-csv" => Some(Self::BulkCsv),
            "multi-select" => Some(Self::MultiSelect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    FailedHttp(u16),
    FailedHtml,
    Error,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(Self::Success),
            "failed_html" => Some(Self::FailedHtml),
            "error" => Some(Self::Error),
            other => other
                .strip_prefix("failed_http:")
                .and_then(|code| code.parse().ok())
                .map(Self::FailedHttp),
        }
    }

    /// Short operator-facing explanation.
    pub fn describe(self) -> String {
        match self {
            Self::Success => "OK".to_string(),
            Self::FailedHttp(code) => format!("FAIL (HTTP {code})"),
            Self::FailedHtml => "FAIL (portal returned an HTML page, login may be required)".to_string(),
            Self::Error => "ERROR (network failure)".to_string(),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::FailedHttp(code) => write!(f, "failed_http:{code}"),
            Self::FailedHtml => f.write_str("failed_html"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// One row of the history ledger. Never mutated once written.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationAttempt {
    pub timestamp: DateTime<Utc>,
    pub origin: Origin,
    pub chat_id: Option<ChatId>,
    pub client_id: String,
    pub range_token: String,
    pub quantity: u32,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationResult {
    pub client_id: String,
    pub range_token: String,
    pub outcome: Outcome,
}

#[cfg(test)]
mod tests {
    use super::{ChatId, Origin, Outcome, Recipient};

    #[test]
    fn outcome_tags_parse_back() {
        for outcome in [
            Outcome::Success,
            Outcome::FailedHttp(502),
            Outcome::FailedHtml,
            Outcome::Error,
        ] {
            assert_eq!(Outcome::parse(&outcome.to_string()), Some(outcome));
        }
        assert_eq!(Outcome::parse("failed_http:abc"), None);
    }

    #[test]
    fn origin_tags_are_stable() {
        assert_eq!(Origin::BulkCsv.as_str(), "bulk-csv");
        assert_eq!(Origin::parse("multi-select"), Some(Origin::MultiSelect));
        assert_eq!(Origin::parse("csv"), None);
    }

    #[test]
    fn recipients_are_ids_or_usernames() {
        assert_eq!(Recipient::parse(" -1001 "), Some(Recipient::Chat(ChatId(-1001))));
        assert_eq!(
            Recipient::parse("@ops_alerts"),
            Some(Recipient::Channel("@ops_alerts".into()))
        );
        assert_eq!(Recipient::parse("ops_alerts"), None);
        assert_eq!(Recipient::parse("@"), None);
        assert_eq!(Recipient::parse("@bad name"), None);
    }
}
