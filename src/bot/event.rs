//! Incoming events, decoded from the transport into closed enums. Unknown
//! tags are kept as explicit variants so the dispatcher can answer them.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Command(Command),
    Callback(Callback),
    Document { file_name: String, contents: String },
    UnsupportedDocument { file_name: String },
    Text(String),
}

impl Event {
    /// Slash-prefixed text is a command; anything else is free text.
    pub fn from_text(text: &str) -> Self {
        match Command::parse(text) {
            Some(cmd) => Self::Command(cmd),
            None => Self::Text(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Clients,
    Ranges { client_id: Option<String> },
    Allocate { args: Vec<String> },
    Today,
    History { limit: Option<String> },
    Select,
    Cancel,
    Unknown(String),
}

impl Command {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let head = parts.next().unwrap_or("");
        // Group chats address commands as `/clients@SomeBot`.
        let name = head.split('@').next().unwrap_or("").to_ascii_lowercase();
        let args: Vec<String> = parts.map(str::to_string).collect();
        Some(match name.as_str() {
            "start" | "menu" => Self::Start,
            "help" => Self::Help,
            "clients" => Self::Clients,
            "ranges" => Self::Ranges {
                client_id: args.into_iter().next(),
            },
            "allocate" => Self::Allocate { args },
            "today" => Self::Today,
            "history" => Self::History {
                limit: args.into_iter().next(),
            },
            "select" => Self::Select,
            "cancel" => Self::Cancel,
            _ => Self::Unknown(name),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    Clients,
    Today,
    History,
    Csv,
    Select,
    Help,
}

impl MenuItem {
    fn tag(self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::Today => "today",
            Self::History => "history",
            Self::Csv => "csv",
            Self::Select => "select",
            Self::Help => "help",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        [
            Self::Clients,
            Self::Today,
            Self::History,
            Self::Csv,
            Self::Select,
            Self::Help,
        ]
        .into_iter()
        .find(|item| item.tag() == tag)
    }
}

/// Button payloads. Entries are addressed by index into the list last shown
/// to the chat, which keeps payloads under the transport's 64-byte limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callback {
    Menu(MenuItem),
    ToggleClient(usize),
    AllClients,
    ClearSelection,
    ShowClients,
    LoadRanges,
    ToggleRange(usize),
    ShowQuantity,
    Quantity(u32),
    CustomQuantity,
    Confirm(u32),
    Unknown(String),
}

impl Callback {
    pub fn parse(data: &str) -> Self {
        let parts: Vec<&str> = data.split(':').collect();
        let parsed = match parts.as_slice() {
            ["menu", tag] => MenuItem::from_tag(tag).map(Self::Menu),
            ["sel", "c", idx] => idx.parse::<usize>().ok().map(Self::ToggleClient),
            ["sel", "all"] => Some(Self::AllClients),
            ["sel", "clear"] => Some(Self::ClearSelection),
            ["sel", "clients"] => Some(Self::ShowClients),
            ["sel", "ranges"] => Some(Self::LoadRanges),
            ["sel", "r", idx] => idx.parse::<usize>().ok().map(Self::ToggleRange),
            ["sel", "q"] => Some(Self::ShowQuantity),
            ["sel", "q", "custom"] => Some(Self::CustomQuantity),
            ["sel", "q", n] => n.parse::<u32>().ok().filter(|n| *n > 0).map(Self::Quantity),
            ["sel", "go", n] => n.parse::<u32>().ok().filter(|n| *n > 0).map(Self::Confirm),
            _ => None,
        };
        parsed.unwrap_or_else(|| Self::Unknown(data.to_string()))
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Menu(item) => format!("menu:{}", item.tag()),
            Self::ToggleClient(i) => format!("sel:c:{i}"),
            Self::AllClients => "sel:all".to_string(),
            Self::ClearSelection => "sel:clear".to_string(),
            Self::ShowClients => "sel:clients".to_string(),
            Self::LoadRanges => "sel:ranges".to_string(),
            Self::ToggleRange(i) => format!("sel:r:{i}"),
            Self::ShowQuantity => "sel:q".to_string(),
            Self::Quantity(n) => format!("sel:q:{n}"),
            Self::CustomQuantity => "sel:q:custom".to_string(),
            Self::Confirm(n) => format!("sel:go:{n}"),
            Self::Unknown(raw) => raw.clone(),
        }
    }
}

/// Uploads accepted for bulk allocation: CSV or plain text.
pub fn is_bulk_document(file_name: Option<&str>, mime_type: Option<&str>) -> bool {
    let by_mime = matches!(mime_type, Some("text/csv" | "text/plain"));
    let by_name = file_name
        .map(|n| n.to_ascii_lowercase())
        .is_some_and(|n| n.ends_with(".csv") || n.ends_with(".txt"));
    by_mime || by_name
}
