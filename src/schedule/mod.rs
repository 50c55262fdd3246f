pub mod types;
pub mod processors;
pub mod progress;
pub mod scheduler;
pub mod callback;
#[cfg(test)]
mod tests;

pub use types::{
    Task, TaskType, TaskConfig, TaskParams, TaskStatus, TaskResult,
    TaskPriority, QueueName, CallbackType
};

pub use crate::storage::task::TaskStorage;

pub use processors::{TaskContext, TaskProcessor};

pub use scheduler::{TaskManager, TaskScheduler};
