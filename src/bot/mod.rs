//! Bot front end - owner commands, callbacks and Telegram delivery.

pub mod router;
pub mod telegram;


pub use router::{Command, Outcome, Reply, Router};
pub use telegram::TelegramClient;
