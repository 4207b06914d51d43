//! Conversational front end: turns decoded [`Event`]s into [`Reply`]s.
//!
//! Every upstream failure is caught here and turned into a readable message;
//! nothing from the portal reaches the transport as an error.

pub mod event;
pub mod reply;
pub mod telegram;

use std::{fmt::Write as _, sync::Arc};

use indexmap::IndexMap;

use crate::{
    bulk::{parse_bulk, run_bulk},
    engine::{AllocationContext, AllocationEngine, AllocationRequest, summarize},
    extract::{compute_today_counts, extract_clients, extract_ranges},
    ledger::Ledger,
    selection::{Selection, SelectionStore},
    types::{AllocationResult, ChatId, Origin, Range},
    upstream::{Session, Upstream, UpstreamError, UpstreamResponse},
};
use event::{Callback, Command, Event, MenuItem};
use reply::{Reply, client_picker, confirmation, main_menu, quantity_picker, range_picker};

const MAX_LISTED_CLIENTS: usize = 200;
const MAX_LISTED_TODAY: usize = 100;
const MAX_RESULT_LINES: usize = 50;
const DEFAULT_HISTORY: usize = 20;
const MAX_HISTORY: usize = 100;

const WELCOME: &str = "💎 Range Allocator\n\n\
Use the menu below or the commands /clients /ranges /allocate /today /history /select.";

const HELP: &str = "Commands:\n\
• /clients — list clients\n\
• /ranges <client_id> — list a client's ranges\n\
• /allocate <client_id> <range_token> <quantity> — allocate once\n\
• /select — pick several clients and ranges, then allocate\n\
• /today — today's per-client stats\n\
• /history [n] — latest allocation attempts\n\
• /cancel — drop the current selection\n\n\
Bulk: send a .csv file with lines `client_id,range_token,quantity`. \
Lines starting with # and blank lines are ignored.";

const NOT_READY: &str = "Select at least one client and one range first.";
const LOGIN_HINT: &str = "login may be required, check LOGIN_FORM_RAW";

pub struct Dispatcher {
    upstream: Arc<dyn Upstream>,
    engine: AllocationEngine,
    ledger: Arc<dyn Ledger>,
    selections: Arc<SelectionStore>,
    notify_admin: bool,
}

impl Dispatcher {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        engine: AllocationEngine,
        ledger: Arc<dyn Ledger>,
        selections: Arc<SelectionStore>,
        notify_admin: bool,
    ) -> Self {
        Self {
            upstream,
            engine,
            ledger,
            selections,
            notify_admin,
        }
    }

    pub async fn handle(&self, chat: ChatId, event: Event) -> Vec<Reply> {
        let outcome = match event {
            Event::Command(cmd) => self.on_command(chat, cmd).await,
            Event::Callback(cb) => self.on_callback(chat, cb).await,
            Event::Document {
                file_name,
                contents,
            } => self.on_document(chat, &file_name, &contents).await,
            Event::UnsupportedDocument { file_name } => Ok(vec![Reply::text(format!(
                "`{file_name}` is not a CSV file. Send client_id,range_token,quantity rows as .csv or .txt."
            ))]),
            Event::Text(text) => Ok(self.on_text(chat, &text)),
        };
        outcome.unwrap_or_else(|e| {
            tracing::warn!(chat = %chat, error = %e, "portal request failed");
            let mut replies = vec![Reply::text(format!("⚠ Could not reach the portal: {e}"))];
            if self.notify_admin {
                replies.push(Reply::admin(format!("chat {chat}: {e}")));
            }
            replies
        })
    }

    async fn on_command(&self, chat: ChatId, cmd: Command) -> Result<Vec<Reply>, UpstreamError> {
        match cmd {
            Command::Start => Ok(vec![Reply::text(WELCOME).with_keyboard(main_menu())]),
            Command::Help => Ok(vec![Reply::text(HELP)]),
            Command::Clients => self.list_clients(chat).await,
            Command::Ranges { client_id: None } => {
                Ok(vec![Reply::text("Usage: /ranges <client_id>")])
            }
            Command::Ranges {
                client_id: Some(id),
            } => self.list_ranges(&id).await,
            Command::Allocate { args } => self.allocate_single(chat, &args).await,
            Command::Today => self.today().await,
            Command::History { limit } => Ok(vec![self.history(limit.as_deref())]),
            Command::Select => self.begin_select(chat).await,
            Command::Cancel => {
                self.selections.with(chat, Selection::clear);
                Ok(vec![Reply::text("Selection cleared.")])
            }
            Command::Unknown(name) => Ok(vec![Reply::text(format!(
                "Unknown command /{name}. Use /start to open the menu."
            ))]),
        }
    }

    async fn on_callback(&self, chat: ChatId, cb: Callback) -> Result<Vec<Reply>, UpstreamError> {
        match cb {
            Callback::Menu(MenuItem::Clients) => self.list_clients(chat).await,
            Callback::Menu(MenuItem::Today) => self.today().await,
            Callback::Menu(MenuItem::History) => Ok(vec![self.history(None)]),
            Callback::Menu(MenuItem::Csv) => Ok(vec![Reply::text(
                "📤 Send a CSV file (client_id,range_token,quantity) as an attachment.",
            )]),
            Callback::Menu(MenuItem::Select) => self.begin_select(chat).await,
            Callback::Menu(MenuItem::Help) => Ok(vec![Reply::text(HELP)]),
            Callback::ToggleClient(idx) => Ok(vec![self.selections.with(chat, |sel| {
                let Some(id) = sel.known_clients.get(idx).map(|c| c.external_id.clone()) else {
                    return stale_menu();
                };
                sel.toggle_client(&id);
                client_picker(sel).replacing()
            })]),
            Callback::AllClients => Ok(vec![self.selections.with(chat, |sel| {
                let known = sel.known_clients.clone();
                sel.select_all_clients(&known);
                client_picker(sel).replacing()
            })]),
            Callback::ClearSelection => {
                self.selections.with(chat, Selection::clear);
                Ok(vec![Reply::text("Selection cleared.").replacing()])
            }
            Callback::ShowClients => Ok(vec![
                self.selections
                    .with(chat, |sel| client_picker(sel).replacing()),
            ]),
            Callback::LoadRanges => self.load_ranges(chat).await,
            Callback::ToggleRange(idx) => Ok(vec![self.selections.with(chat, |sel| {
                let Some(token) = sel.known_ranges.get(idx).map(|r| r.token.clone()) else {
                    return stale_menu();
                };
                sel.toggle_range(&token);
                range_picker(sel).replacing()
            })]),
            Callback::ShowQuantity => {
                let sel = self.selections.snapshot(chat);
                if !sel.is_ready() {
                    return Ok(vec![Reply::text(NOT_READY)]);
                }
                Ok(vec![quantity_picker().replacing()])
            }
            Callback::Quantity(q) => {
                let sel = self.selections.snapshot(chat);
                if !sel.is_ready() {
                    return Ok(vec![Reply::text(NOT_READY)]);
                }
                Ok(vec![confirmation(&sel, q).replacing()])
            }
            Callback::CustomQuantity => {
                self.selections.with(chat, Selection::begin_custom_quantity);
                Ok(vec![Reply::text(
                    "Send the quantity as a number (e.g. 25).",
                )])
            }
            Callback::Confirm(q) => self.allocate_selection(chat, q).await,
            Callback::Unknown(raw) => {
                tracing::debug!(chat = %chat, data = %raw, "unknown callback");
                Ok(vec![Reply::text("⚠ Unknown menu action. Use /start to reopen the menu.")])
            }
        }
    }

    fn on_text(&self, chat: ChatId, text: &str) -> Vec<Reply> {
        let reply = self.selections.with(chat, |sel| {
            if !sel.pending_quantity_prompt {
                return Reply::text("Use /start to open the menu or /help for commands.");
            }
            match sel.resolve_custom_quantity(text) {
                Ok(q) => confirmation(sel, q),
                Err(e) => Reply::text(format!("⚠ {e}. Try again or /cancel.")),
            }
        });
        vec![reply]
    }

    async fn session(&self) -> Result<Session, UpstreamError> {
        let session = self.upstream.authenticate().await?;
        tracing::debug!(authenticated = session.authenticated, "portal session ready");
        Ok(session)
    }

    async fn list_clients(&self, chat: ChatId) -> Result<Vec<Reply>, UpstreamError> {
        let session = self.session().await?;
        let resp = self.upstream.fetch_listing(&session).await?;
        if let Some(reply) = http_failure(&resp, "listing clients") {
            return Ok(vec![reply]);
        }
        let clients = extract_clients(&resp.body);
        if clients.is_empty() {
            return Ok(vec![Reply::text(format!("No clients parsed ({LOGIN_HINT})."))]);
        }
        let mut text = format!("Clients ({}):\n", clients.len());
        for c in clients.iter().take(MAX_LISTED_CLIENTS) {
            let _ = writeln!(text, "{} [{}]", c.name, c.external_id);
        }
        // A fresh list invalidates picks made against the previous one.
        self.selections
            .with(chat, |sel| sel.replace_clients(clients));
        Ok(vec![Reply::text(text)])
    }

    async fn list_ranges(&self, client_id: &str) -> Result<Vec<Reply>, UpstreamError> {
        let session = self.session().await?;
        let resp = self
            .upstream
            .fetch_ranges_for_client(&session, client_id)
            .await?;
        if let Some(reply) = http_failure(&resp, "loading ranges") {
            return Ok(vec![reply]);
        }
        let ranges = extract_ranges(&resp.body);
        if ranges.is_empty() {
            return Ok(vec![Reply::text(format!(
                "No ranges found for client {client_id} ({LOGIN_HINT})."
            ))]);
        }
        let mut text = format!("Ranges for client {client_id}:\n");
        for r in &ranges {
            let handle = if r.allocatable() {
                r.token.as_str()
            } else {
                "not allocatable"
            };
            let _ = writeln!(
                text,
                "{} — all {} / free {} / allocated {} [{handle}]",
                r.label, r.all, r.free, r.allocated
            );
        }
        Ok(vec![Reply::text(text)])
    }

    async fn today(&self) -> Result<Vec<Reply>, UpstreamError> {
        let session = self.session().await?;
        let resp = self.upstream.fetch_today_stats(&session).await?;
        if let Some(reply) = http_failure(&resp, "loading today stats") {
            return Ok(vec![reply]);
        }
        let counts = compute_today_counts(&resp.body);
        if counts.is_empty() {
            return Ok(vec![Reply::text(format!(
                "No today stats parsed ({LOGIN_HINT} or the page changed)."
            ))]);
        }
        let mut text = String::from("Today stats per client:\n");
        for (client, c) in counts.iter().take(MAX_LISTED_TODAY) {
            let _ = writeln!(
                text,
                "{client} — TO BE PAID: {}  NOT TO BE PAID: {}",
                c.to_be_paid, c.not_to_be_paid
            );
        }
        Ok(vec![Reply::text(text)])
    }

    fn history(&self, limit: Option<&str>) -> Reply {
        let limit = limit
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_HISTORY)
            .min(MAX_HISTORY);
        match self.ledger.recent(limit, None) {
            Ok(rows) if rows.is_empty() => Reply::text("No history yet."),
            Ok(rows) => {
                let mut text = String::from("Allocation history (latest first):\n");
                for a in rows {
                    let _ = writeln!(
                        text,
                        "{} | {} | {} | {} | {} | {}",
                        a.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        a.origin.as_str(),
                        a.client_id,
                        a.range_token,
                        a.quantity,
                        a.outcome
                    );
                }
                Reply::text(text)
            }
            Err(e) => {
                tracing::error!(error = %e, "history read failed");
                Reply::text("Could not read history.")
            }
        }
    }

    async fn allocate_single(
        &self,
        chat: ChatId,
        args: &[String],
    ) -> Result<Vec<Reply>, UpstreamError> {
        let [client_id, range_token, quantity] = args else {
            return Ok(vec![Reply::text(
                "Usage: /allocate <client_id> <range_token> <quantity>",
            )]);
        };
        let Some(quantity) = quantity.parse::<u32>().ok().filter(|q| *q > 0) else {
            return Ok(vec![Reply::text("Quantity must be a positive integer.")]);
        };
        let session = self.session().await?;
        let request = AllocationRequest {
            client_id: client_id.clone(),
            range_token: range_token.clone(),
            quantity,
        };
        let reply = match self
            .engine
            .allocate_one(&session, request, AllocationContext::new(Origin::Manual, chat))
            .await
        {
            Ok(result) if result.outcome.is_success() => Reply::text(format!(
                "✅ Numbers allocated to client {client_id} range {range_token} qty {quantity}"
            )),
            Ok(result) => Reply::text(format!(
                "❌ Allocation failed: {}",
                result.outcome.describe()
            )),
            Err(e) => Reply::text(format!("⚠ {e}")),
        };
        Ok(vec![reply])
    }

    async fn begin_select(&self, chat: ChatId) -> Result<Vec<Reply>, UpstreamError> {
        let session = self.session().await?;
        let resp = self.upstream.fetch_listing(&session).await?;
        if let Some(reply) = http_failure(&resp, "listing clients") {
            return Ok(vec![reply]);
        }
        let clients = extract_clients(&resp.body);
        if clients.is_empty() {
            return Ok(vec![Reply::text(format!("No clients parsed ({LOGIN_HINT})."))]);
        }
        Ok(vec![self.selections.with(chat, |sel| {
            sel.replace_clients(clients);
            client_picker(sel)
        })])
    }

    async fn load_ranges(&self, chat: ChatId) -> Result<Vec<Reply>, UpstreamError> {
        let chosen = self.selections.snapshot(chat).clients;
        if chosen.is_empty() {
            return Ok(vec![Reply::text("Select at least one client first.")]);
        }
        let session = self.session().await?;
        let mut by_token: IndexMap<String, Range> = IndexMap::new();
        for client_id in &chosen {
            let resp = self
                .upstream
                .fetch_ranges_for_client(&session, client_id)
                .await?;
            if let Some(reply) = http_failure(&resp, "loading ranges") {
                return Ok(vec![reply]);
            }
            for range in extract_ranges(&resp.body) {
                if range.allocatable() && !by_token.contains_key(&range.token) {
                    by_token.insert(range.token.clone(), range);
                }
            }
        }
        if by_token.is_empty() {
            return Ok(vec![Reply::text(format!(
                "No allocatable ranges found for the selected clients ({LOGIN_HINT})."
            ))]);
        }
        let ranges: Vec<Range> = by_token.into_values().collect();
        Ok(vec![self.selections.with(chat, |sel| {
            sel.replace_ranges(ranges);
            range_picker(sel).replacing()
        })])
    }

    async fn allocate_selection(
        &self,
        chat: ChatId,
        quantity: u32,
    ) -> Result<Vec<Reply>, UpstreamError> {
        // Taken under the store lock so a repeated tap finds nothing to send.
        let Some((clients, ranges)) = self.selections.with(chat, Selection::take_pairs) else {
            return Ok(vec![Reply::text(
                "Nothing selected. Use /select to start again.",
            )]);
        };
        let session = match self.session().await {
            Ok(session) => session,
            Err(e) => {
                self.selections
                    .with(chat, |s| s.restore_pairs(clients, ranges));
                return Err(e);
            }
        };
        let results = match self
            .engine
            .allocate(
                &session,
                &clients,
                &ranges,
                quantity,
                AllocationContext::new(Origin::MultiSelect, chat),
            )
            .await
        {
            Ok(results) => results,
            Err(e) => return Ok(vec![Reply::text(format!("⚠ {e}"))]),
        };
        Ok(vec![Reply::text(render_results(&results))])
    }

    async fn on_document(
        &self,
        chat: ChatId,
        file_name: &str,
        contents: &str,
    ) -> Result<Vec<Reply>, UpstreamError> {
        let lines = parse_bulk(contents);
        if lines.is_empty() {
            return Ok(vec![Reply::text(format!(
                "`{file_name}` has no allocation rows."
            ))]);
        }
        tracing::info!(chat = %chat, file = file_name, rows = lines.len(), "bulk upload received");
        let session = self.session().await?;
        let report = run_bulk(
            &self.engine,
            &session,
            lines,
            AllocationContext::new(Origin::BulkCsv, chat),
        )
        .await;
        Ok(vec![Reply::text(report.render())])
    }
}

fn stale_menu() -> Reply {
    Reply::text("That menu is out of date. Use /select to start again.")
}

fn http_failure(resp: &UpstreamResponse, action: &str) -> Option<Reply> {
    (!resp.is_ok()).then(|| {
        Reply::text(format!(
            "⚠ Portal answered HTTP {} while {action}. Check UPSTREAM_BASE and the page paths.",
            resp.status
        ))
    })
}

fn render_results(results: &[AllocationResult]) -> String {
    let mut text = format!("Allocation finished: {}.\n", summarize(results));
    for r in results.iter().take(MAX_RESULT_LINES) {
        let _ = writeln!(
            text,
            "{} / {} -> {}",
            r.client_id,
            r.range_token,
            r.outcome.describe()
        );
    }
    if results.len() > MAX_RESULT_LINES {
        let _ = writeln!(text, "… and {} more (see /history)", results.len() - MAX_RESULT_LINES);
    }
    text
}
