//! Command routing.
//!
//! The router checks the sender, calls into the task subsystem and returns an
//! [`Outcome`] describing what to send back. It never talks to Telegram
//! itself, so every path can be exercised without a network.

use chrono::NaiveDateTime;
use std::sync::Arc;
use teloxide::types::UserId;
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

use crate::tasks::{is_quick_task, parse_task, Notifier, Scheduler, StorageError, Task, TaskDraft, TaskStore};

pub const GREETING: &str = "Hi! I'm your personal assistant. Send /newtask to create a task.";
pub const NEW_TASK_PROMPT: &str = "Send the task as: 2025-07-07 14:00 Meeting with a client";
pub const FORMAT_ERROR: &str = "❌ Invalid format. Example: 2025-07-07 14:00 Meeting";
pub const CHAT_USAGE: &str = "Write your question after /chat";

/// Callback data prefix for delete buttons.
const DELETE_PREFIX: &str = "del_";

/// A `/tasks` page stays under Telegram's message length and keyboard size.
const PAGE_CHARS: usize = 4000;
const PAGE_BUTTONS: usize = 50;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "greeting")]
    Start,
    #[command(description = "show this help")]
    Help,
    #[command(description = "how to add a task")]
    NewTask,
    #[command(description = "list all tasks")]
    Tasks,
    #[command(description = "tasks due today")]
    Today,
    #[command(description = "ask the assistant a question")]
    Chat(String),
}

/// An inline button under a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

/// Text to send to the owner, optionally with one button per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub buttons: Vec<Button>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), buttons: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Sender is not the owner, or there is nothing to say.
    Ignore,
    Reply(Reply),
    /// Several messages, sent in order.
    Pages(Vec<Reply>),
    /// Forward the prompt to the chat service and relay its answer.
    Chat { prompt: String },
}

pub struct Router<N: Notifier> {
    owner: UserId,
    store: Arc<dyn TaskStore>,
    scheduler: Scheduler<N>,
}

impl<N: Notifier> Router<N> {
    pub fn new(owner: UserId, store: Arc<dyn TaskStore>, notifier: Arc<N>) -> Self {
        let scheduler = Scheduler::new(notifier, store.clone());
        Self { owner, store, scheduler }
    }

    /// Re-create reminder timers from the store. Call once at startup.
    pub fn restore(&self) -> Result<usize, StorageError> {
        self.scheduler.restore()
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub fn scheduler(&self) -> &Scheduler<N> {
        &self.scheduler
    }

    pub fn is_owner(&self, user: UserId) -> bool {
        user == self.owner
    }

    fn authorized(&self, sender: UserId) -> bool {
        if !self.is_owner(sender) {
            debug!("Ignoring update from non-owner {}", sender);
            return false;
        }
        true
    }

    pub fn handle_command(&self, sender: UserId, command: Command, now: NaiveDateTime) -> Result<Outcome, StorageError> {
        if !self.authorized(sender) {
            return Ok(Outcome::Ignore);
        }

        let outcome = match command {
            Command::Start => Outcome::Reply(Reply::text(GREETING)),
            Command::Help => Outcome::Reply(Reply::text(Command::descriptions().to_string())),
            Command::NewTask => Outcome::Reply(Reply::text(NEW_TASK_PROMPT)),
            Command::Tasks => Outcome::Pages(render_all(&self.store.list_all()?)),
            Command::Today => Outcome::Reply(render_today(&self.store.list_for_date(now.date())?)),
            Command::Chat(prompt) => {
                let prompt = prompt.trim();
                if prompt.is_empty() {
                    Outcome::Reply(Reply::text(CHAT_USAGE))
                } else {
                    Outcome::Chat { prompt: prompt.to_string() }
                }
            }
        };
        Ok(outcome)
    }

    /// Free text: a quick task, or the format hint.
    pub fn handle_text(&self, sender: UserId, text: &str, now: NaiveDateTime) -> Result<Outcome, StorageError> {
        if !self.authorized(sender) {
            return Ok(Outcome::Ignore);
        }

        let text = text.trim();
        if !is_quick_task(text) {
            debug!("Not a task line: {:?}", text);
            return Ok(Outcome::Reply(Reply::text(FORMAT_ERROR)));
        }

        let draft = match parse_task(text) {
            Ok(draft) => draft,
            Err(e) => {
                debug!("Rejected task line: {}", e);
                return Ok(Outcome::Reply(Reply::text(FORMAT_ERROR)));
            }
        };

        let task = self.create_task(draft)?;
        let mut reply = format!("✅ Task added: {} — {}", task.due_string(), task.text);
        if task.due_at <= now {
            reply.push_str("\n(already due, reminding now)");
        }
        Ok(Outcome::Reply(Reply::text(reply)))
    }

    /// Inline button presses.
    pub fn handle_callback(&self, sender: UserId, data: &str) -> Result<Outcome, StorageError> {
        if !self.authorized(sender) {
            return Ok(Outcome::Ignore);
        }

        let Some(id) = data.strip_prefix(DELETE_PREFIX).and_then(|s| s.parse::<i64>().ok()) else {
            warn!("Unknown callback data: {:?}", data);
            return Ok(Outcome::Ignore);
        };

        self.delete_task(id)?;
        Ok(Outcome::Reply(Reply::text(format!("🗑 Task #{id} deleted."))))
    }

    pub fn create_task(&self, draft: TaskDraft) -> Result<Task, StorageError> {
        let task = self.store.create(&draft)?;
        self.scheduler.schedule(task.id, task.due_at, task.text.clone());
        info!("📝 Task #{} at {}: {}", task.id, task.due_string(), task.text);
        Ok(task)
    }

    pub fn delete_task(&self, id: i64) -> Result<(), StorageError> {
        self.store.delete(id)?;
        let cancelled = self.scheduler.cancel(id);
        info!("🗑️ Deleted task #{} (timer cancelled: {})", id, cancelled);
        Ok(())
    }
}

/// One line and one delete button per task, split into pages so each line
/// and its button land in the same message.
fn render_all(tasks: &[Task]) -> Vec<Reply> {
    if tasks.is_empty() {
        return vec![Reply::text("No tasks yet.")];
    }

    let mut pages = Vec::new();
    let mut page = Reply::text("All tasks:\n");
    let mut page_chars = page.text.chars().count();
    for task in tasks {
        let mark = if task.fired { "✔" } else { "🕒" };
        let line = format!("#{} {} {} — {}\n", task.id, mark, task.due_string(), task.text);
        let line_chars = line.chars().count();

        let full = page.buttons.len() >= PAGE_BUTTONS || page_chars + line_chars > PAGE_CHARS;
        if full && !page.buttons.is_empty() {
            pages.push(std::mem::replace(&mut page, Reply::text(String::new())));
            page_chars = 0;
        }

        page.text.push_str(&line);
        page_chars += line_chars;
        page.buttons.push(Button {
            label: format!("🗑 #{}", task.id),
            data: format!("{DELETE_PREFIX}{}", task.id),
        });
    }
    pages.push(page);
    pages
}

fn render_today(tasks: &[Task]) -> Reply {
    if tasks.is_empty() {
        return Reply::text("Nothing scheduled for today.");
    }

    let mut text = String::from("Tasks for today:\n");
    for task in tasks {
        text.push_str(&format!("🕒 {} — {}\n", task.due_at.format("%H:%M"), task.text));
    }
    Reply::text(text)
}
