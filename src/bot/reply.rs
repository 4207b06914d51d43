use super::event::{Callback, MenuItem};
use crate::selection::Selection;

const MAX_PICKER_ITEMS: usize = 40;
const MAX_LABEL_CHARS: usize = 40;
pub const PRESET_QUANTITIES: [u32; 3] = [10, 50, 100];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The conversation the event came from.
    Origin,
    /// The optional administrative channel.
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    fn new(label: impl Into<String>, callback: Callback) -> Self {
        Self {
            label: label.into(),
            data: callback.encode(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub keyboard: Vec<Vec<Button>>,
    /// Replace the message whose button was pressed instead of sending anew.
    pub replace: bool,
    pub target: Target,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: Vec::new(),
            replace: false,
            target: Target::Origin,
        }
    }

    pub fn admin(text: impl Into<String>) -> Self {
        Self {
            target: Target::Admin,
            ..Self::text(text)
        }
    }

    pub fn with_keyboard(mut self, keyboard: Vec<Vec<Button>>) -> Self {
        self.keyboard = keyboard;
        self
    }

    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }
}

pub fn main_menu() -> Vec<Vec<Button>> {
    vec![
        vec![
            Button::new("📋 Clients", Callback::Menu(MenuItem::Clients)),
            Button::new("📈 Today Stats", Callback::Menu(MenuItem::Today)),
        ],
        vec![
            Button::new("🕒 History", Callback::Menu(MenuItem::History)),
            Button::new("📤 Bulk CSV", Callback::Menu(MenuItem::Csv)),
        ],
        vec![
            Button::new("🧮 Multi-select allocate", Callback::Menu(MenuItem::Select)),
            Button::new("❓ Help", Callback::Menu(MenuItem::Help)),
        ],
    ]
}

pub fn client_picker(sel: &Selection) -> Reply {
    let mut rows: Vec<Vec<Button>> = sel
        .known_clients
        .iter()
        .take(MAX_PICKER_ITEMS)
        .enumerate()
        .map(|(i, c)| {
            let mark = if sel.clients.contains(&c.external_id) { "✅" } else { "▫️" };
            vec![Button::new(
                format!("{mark} {} [{}]", shorten(&c.name), c.external_id),
                Callback::ToggleClient(i),
            )]
        })
        .collect();
    rows.push(vec![
        Button::new("Select all", Callback::AllClients),
        Button::new("Clear", Callback::ClearSelection),
    ]);
    rows.push(vec![Button::new("Next: ranges ▶", Callback::LoadRanges)]);

    let mut text = format!(
        "Select clients ({} of {} selected).",
        sel.clients.len(),
        sel.known_clients.len()
    );
    if sel.known_clients.len() > MAX_PICKER_ITEMS {
        text.push_str(&format!(
            "\nOnly the first {MAX_PICKER_ITEMS} are shown; \"Select all\" covers every client."
        ));
    }
    Reply::text(text).with_keyboard(rows)
}

pub fn range_picker(sel: &Selection) -> Reply {
    let mut rows: Vec<Vec<Button>> = sel
        .known_ranges
        .iter()
        .take(MAX_PICKER_ITEMS)
        .enumerate()
        .map(|(i, r)| {
            let mark = if sel.ranges.contains(&r.token) { "✅" } else { "▫️" };
            vec![Button::new(
                format!("{mark} {} (free {})", shorten(&r.label), r.free),
                Callback::ToggleRange(i),
            )]
        })
        .collect();
    rows.push(vec![
        Button::new("◀ Clients", Callback::ShowClients),
        Button::new("Quantity ▶", Callback::ShowQuantity),
    ]);
    let text = format!(
        "Select ranges for {} client(s) ({} of {} selected).",
        sel.clients.len(),
        sel.ranges.len(),
        sel.known_ranges.len()
    );
    Reply::text(text).with_keyboard(rows)
}

pub fn quantity_picker() -> Reply {
    let presets = PRESET_QUANTITIES
        .iter()
        .map(|q| Button::new(q.to_string(), Callback::Quantity(*q)))
        .collect();
    Reply::text("How many numbers per client and range?").with_keyboard(vec![
        presets,
        vec![Button::new("Custom…", Callback::CustomQuantity)],
        vec![Button::new("✖ Cancel", Callback::ClearSelection)],
    ])
}

pub fn confirmation(sel: &Selection, quantity: u32) -> Reply {
    let pairs = sel.clients.len() * sel.ranges.len();
    let text = format!(
        "Allocate {quantity} numbers for {} client(s) × {} range(s)? That is {pairs} request(s).",
        sel.clients.len(),
        sel.ranges.len()
    );
    Reply::text(text).with_keyboard(vec![vec![
        Button::new("✅ Allocate", Callback::Confirm(quantity)),
        Button::new("✖ Cancel", Callback::ClearSelection),
    ]])
}

fn shorten(label: &str) -> String {
    if label.chars().count() <= MAX_LABEL_CHARS {
        return label.to_string();
    }
    let mut out: String = label.chars().take(MAX_LABEL_CHARS - 1).collect();
    out.push('…');
    out
}
