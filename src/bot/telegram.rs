//! Telegram client using teloxide.

use teloxide::prelude::*;
use teloxide::types::{ChatAction, InlineKeyboardButton, InlineKeyboardMarkup};
use tracing::warn;

use super::router::{Button, Reply};
use crate::tasks::Notifier;

/// Telegram rejects messages above 4096 characters.
const MAX_MESSAGE_CHARS: usize = 4000;

/// Outbound side of the bot. Everything goes to the owner's private chat.
pub struct TelegramClient {
    bot: Bot,
    owner_chat: ChatId,
}

impl TelegramClient {
    pub fn new(bot: Bot, owner_chat: ChatId) -> Self {
        Self { bot, owner_chat }
    }

    pub async fn send_text(&self, text: &str) -> Result<(), String> {
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            self.send_chunk(chunk, None).await?;
        }
        Ok(())
    }

    /// Send a reply. Long text is chunked and the keyboard goes under the
    /// last chunk.
    pub async fn send_reply(&self, reply: &Reply) -> Result<(), String> {
        if reply.buttons.is_empty() {
            return self.send_text(&reply.text).await;
        }

        let mut chunks = split_message(&reply.text, MAX_MESSAGE_CHARS);
        let last = chunks.pop().unwrap_or_default();
        for chunk in chunks {
            self.send_chunk(chunk, None).await?;
        }
        self.send_chunk(last, Some(keyboard(&reply.buttons))).await
    }

    async fn send_chunk(&self, text: String, markup: Option<InlineKeyboardMarkup>) -> Result<(), String> {
        let mut request = self.bot.send_message(self.owner_chat, text);
        if let Some(markup) = markup {
            request = request.reply_markup(markup);
        }
        request.await.map(|_| ()).map_err(|e| {
            let msg = format!("Failed to send: {e}");
            warn!("{}", msg);
            msg
        })
    }

    /// Show "typing…" while a slow answer is being prepared.
    pub async fn send_typing(&self) {
        if let Err(e) = self.bot.send_chat_action(self.owner_chat, ChatAction::Typing).await {
            warn!("Failed to send typing action: {e}");
        }
    }
}

impl Notifier for TelegramClient {
    async fn notify(&self, text: &str) -> Result<(), String> {
        self.send_text(&format!("🔔 Reminder: {text}")).await
    }
}

/// One button per row.
fn keyboard(buttons: &[Button]) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = buttons
        .iter()
        .map(|b| vec![InlineKeyboardButton::callback(b.label.clone(), b.data.clone())])
        .collect();
    InlineKeyboardMarkup::new(rows)
}

/// Split text into pieces of at most `max_chars` characters, preferring
/// line boundaries.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();

        if current_len + line_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len > max_chars {
            // A single line longer than the limit is cut by characters
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }

        current.push_str(line);
        current_len += line_len;
    }

    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}
