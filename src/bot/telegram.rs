//! Telegram Bot API transport: long-poll updates in, replies out.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};

use super::{
    Dispatcher,
    event::{Callback, Event, is_bulk_document},
    reply::{Button, Reply, Target},
};
use crate::types::{ChatId, Recipient};

const API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(3);
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    message_id: i64,
    chat: ChatRef,
    text: Option<String>,
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct ChatRef {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Document {
    file_id: String,
    file_name: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    data: Option<String>,
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

pub struct TelegramApi {
    http: reqwest::Client,
    token: String,
    base: String,
}

impl TelegramApi {
    pub fn new(token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            token: token.to_string(),
            base: API_BASE.to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: &Value) -> Result<T> {
        let url = format!("{}/bot{}/{method}", self.base, self.token);
        let resp = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            // The URL carries the token; keep it out of error text.
            .map_err(|e| anyhow!("{method} request failed: {}", e.without_url()))?;
        let envelope: ApiEnvelope<T> = resp
            .json()
            .await
            .with_context(|| format!("{method} returned an unreadable body"))?;
        if !envelope.ok {
            return Err(anyhow!(
                "{method} rejected: {}",
                envelope.description.unwrap_or_default()
            ));
        }
        envelope
            .result
            .ok_or_else(|| anyhow!("{method} returned no result"))
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    async fn send_message(
        &self,
        to: &Recipient,
        text: &str,
        keyboard: &[Vec<Button>],
    ) -> Result<()> {
        let mut body = json!({ "chat_id": chat_id_value(to), "text": text });
        if !keyboard.is_empty() {
            body["reply_markup"] = keyboard_markup(keyboard);
        }
        self.call::<Value>("sendMessage", &body).await.map(|_| ())
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: i64,
        text: &str,
        keyboard: &[Vec<Button>],
    ) -> Result<()> {
        let mut body = json!({ "chat_id": chat.0, "message_id": message_id, "text": text });
        if !keyboard.is_empty() {
            body["reply_markup"] = keyboard_markup(keyboard);
        }
        self.call::<Value>("editMessageText", &body).await.map(|_| ())
    }

    async fn answer_callback(&self, id: &str) -> Result<()> {
        self.call::<Value>("answerCallbackQuery", &json!({ "callback_query_id": id }))
            .await
            .map(|_| ())
    }

    async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let file: RemoteFile = self.call("getFile", &json!({ "file_id": file_id })).await?;
        let path = file
            .file_path
            .ok_or_else(|| anyhow!("getFile returned no path"))?;
        let url = format!("{}/file/bot{}/{path}", self.base, self.token);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| anyhow!("file download failed: {}", e.without_url()))?;
        if !resp.status().is_success() {
            return Err(anyhow!("file download answered HTTP {}", resp.status().as_u16()));
        }
        Ok(resp
            .bytes()
            .await
            .map_err(|e| anyhow!("file download interrupted: {}", e.without_url()))?
            .to_vec())
    }
}

fn chat_id_value(to: &Recipient) -> Value {
    match to {
        Recipient::Chat(chat) => json!(chat.0),
        Recipient::Channel(name) => json!(name),
    }
}

fn keyboard_markup(keyboard: &[Vec<Button>]) -> Value {
    let rows: Vec<Vec<Value>> = keyboard
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| json!({ "text": b.label, "callback_data": b.data }))
                .collect()
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Split on line boundaries so each piece fits one message. A single line
/// longer than `max` is cut on a char boundary.
fn split_message(text: &str, max: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for line in text.split_inclusive('\n') {
        if current.chars().count() + line.chars().count() > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if line.chars().count() > max {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Where an event came from, for routing its replies.
struct Source {
    chat: ChatId,
    /// Message carrying the pressed button, when the event is a callback.
    message_id: Option<i64>,
}

pub async fn run(
    api: Arc<TelegramApi>,
    dispatcher: Arc<Dispatcher>,
    admin_chat: Option<Recipient>,
) -> Result<()> {
    tracing::info!("polling for updates");
    let mut offset = 0;
    loop {
        let polled = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping");
                return Ok(());
            }
            polled = api.get_updates(offset) => polled,
        };
        let updates = match polled {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "getUpdates failed, retrying");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };
        for update in updates {
            offset = offset.max(update.update_id + 1);
            let api = api.clone();
            let dispatcher = dispatcher.clone();
            let admin_chat = admin_chat.clone();
            tokio::spawn(async move {
                handle_update(&api, &dispatcher, admin_chat.as_ref(), update).await;
            });
        }
    }
}

async fn handle_update(
    api: &TelegramApi,
    dispatcher: &Dispatcher,
    admin_chat: Option<&Recipient>,
    update: Update,
) {
    let (source, event) = match decode(api, update).await {
        Ok(Some(decoded)) => decoded,
        Ok(None) => return,
        Err((chat, e)) => {
            tracing::warn!(chat = %chat, error = %e, "could not decode update");
            let _ = api
                .send_message(
                    &Recipient::from(chat),
                    &format!("⚠ Could not read that message: {e}"),
                    &[],
                )
                .await;
            return;
        }
    };
    let replies = dispatcher.handle(source.chat, event).await;
    deliver(api, &source, admin_chat, replies).await;
}

async fn decode(
    api: &TelegramApi,
    update: Update,
) -> std::result::Result<Option<(Source, Event)>, (ChatId, anyhow::Error)> {
    if let Some(query) = update.callback_query {
        if let Err(e) = api.answer_callback(&query.id).await {
            tracing::debug!(error = %e, "answerCallbackQuery failed");
        }
        let Some(message) = query.message else {
            return Ok(None);
        };
        let event = Event::Callback(Callback::parse(query.data.as_deref().unwrap_or("")));
        let source = Source {
            chat: ChatId(message.chat.id),
            message_id: Some(message.message_id),
        };
        return Ok(Some((source, event)));
    }

    let Some(message) = update.message else {
        return Ok(None);
    };
    let chat = ChatId(message.chat.id);
    let source = Source {
        chat,
        message_id: None,
    };
    if let Some(doc) = message.document {
        let file_name = doc.file_name.clone().unwrap_or_else(|| "upload".to_string());
        if !is_bulk_document(doc.file_name.as_deref(), doc.mime_type.as_deref()) {
            return Ok(Some((source, Event::UnsupportedDocument { file_name })));
        }
        let bytes = api.download(&doc.file_id).await.map_err(|e| (chat, e))?;
        let contents = String::from_utf8_lossy(&bytes).into_owned();
        return Ok(Some((source, Event::Document { file_name, contents })));
    }
    Ok(message
        .text
        .map(|text| (source, Event::from_text(&text))))
}

async fn deliver(
    api: &TelegramApi,
    source: &Source,
    admin_chat: Option<&Recipient>,
    replies: Vec<Reply>,
) {
    for reply in replies {
        let to = match reply.target {
            Target::Origin => Recipient::from(source.chat),
            Target::Admin => match admin_chat {
                Some(admin) => admin.clone(),
                None => continue,
            },
        };
        let chunks = split_message(&reply.text, MAX_MESSAGE_CHARS);
        let last = chunks.len() - 1;

        // Only the originating chat owns the message whose button was pressed.
        if let (Target::Origin, true, Some(message_id), 1) =
            (reply.target, reply.replace, source.message_id, chunks.len())
        {
            match api
                .edit_message(source.chat, message_id, &chunks[0], &reply.keyboard)
                .await
            {
                Ok(()) => continue,
                Err(e) => tracing::debug!(error = %e, "edit failed, sending a new message"),
            }
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let keyboard: &[Vec<Button>] = if i == last { &reply.keyboard } else { &[] };
            if let Err(e) = api.send_message(&to, chunk, keyboard).await {
                tracing::error!(to = %to, error = %e, "sendMessage failed");
                if let Some(admin) = admin_chat.filter(|a| **a != to) {
                    let _ = api
                        .send_message(admin, &format!("send to {to} failed: {e}"), &[])
                        .await;
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Update, chat_id_value, keyboard_markup, split_message};
    use crate::{
        bot::reply::main_menu,
        types::{ChatId, Recipient},
    };

    #[test]
    fn split_message_respects_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc\n";
        assert_eq!(split_message(text, 10), vec!["aaaa\nbbbb\n", "cccc\n"]);
        assert_eq!(split_message("", 10), vec![""]);
    }

    #[test]
    fn split_message_cuts_overlong_lines() {
        let chunks = split_message(&"é".repeat(25), 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }

    #[test]
    fn keyboard_serialises_callback_data() {
        let markup = keyboard_markup(&main_menu());
        assert_eq!(markup["inline_keyboard"][0][0]["callback_data"], "menu:clients");
        assert_eq!(markup["inline_keyboard"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn updates_deserialise_from_api_shape() {
        let raw = json!({
            "update_id": 10,
            "callback_query": {
                "id": "q1",
                "data": "sel:all",
                "message": { "message_id": 5, "chat": { "id": -42 }, "text": "Select clients" }
            }
        });
        let update: Update = serde_json::from_value(raw).unwrap();
        let query = update.callback_query.unwrap();
        assert_eq!(query.data.as_deref(), Some("sel:all"));
        assert_eq!(query.message.unwrap().chat.id, -42);
        assert!(update.message.is_none());
    }

    #[test]
    fn channel_recipients_are_sent_as_strings() {
        assert_eq!(chat_id_value(&Recipient::Chat(ChatId(-100))), json!(-100));
        assert_eq!(
            chat_id_value(&Recipient::Channel("@ops".into())),
            json!("@ops")
        );
    }
}
