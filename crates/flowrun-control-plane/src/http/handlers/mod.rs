//! HTTP request handlers.

mod events;
mod health;
mod tasks;

pub use events::task_events;
pub use health::{health_check, metrics_handler};
pub use tasks::{cancel_task, get_history, get_task, list_tasks, submit_task};
