use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a task across the whole system.
///
/// Wrapper around a UUID v4 string. It is the join key between the envelope
/// travelling through the broker queue and the record kept in the result store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a worker consume loop, recorded on the task when it starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("worker-{}", &id[..8]))
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The unit of work transported through the broker queue.
///
/// Immutable once published: a redelivery hands out the very same envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEnvelope {
    pub id: TaskId,
    /// Name of the registered handler that must execute the task.
    pub task_name: String,
    /// Positional arguments; their schema is implied by `task_name`.
    pub args: Vec<serde_json::Value>,
    /// Timestamp (ms) when the producer stamped the envelope.
    pub created_at: u64,
}

impl TaskEnvelope {
    pub fn new(task_name: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            id: TaskId::new(),
            task_name: task_name.into(),
            args,
            created_at: now_ms(),
        }
    }
}

/// Coarse lifecycle state, without the terminal payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Started,
    Success,
    Failure,
}

impl TaskState {
    /// Position in the lifecycle order. SUCCESS and FAILURE share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Started => 1,
            TaskState::Success | TaskState::Failure => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskState::Pending => "PENDING",
            TaskState::Started => "STARTED",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
        };
        f.write_str(name)
    }
}

/// Category of a terminal failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// No handler is registered under the envelope's task name.
    UnknownTask,
    /// The handler rejected its arguments.
    InvalidArguments,
    /// Arithmetic fault such as a division by zero.
    Arithmetic,
    /// Any other error returned by the handler.
    Handler,
    /// The handler panicked.
    Panicked,
}

/// Serialized error description stored on a FAILURE record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown_task(task_name: &str) -> Self {
        Self::new(
            FailureKind::UnknownTask,
            format!("Unknown task handler: {}", task_name),
        )
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Lifecycle status of a task, carrying the payload of the terminal states.
///
/// Serialized flattened into [`TaskRecord`] as `"state"` plus either
/// `"result"` (SUCCESS) or `"error"` (FAILURE).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Submitted, not yet picked up by any worker.
    Pending,
    /// A worker has claimed the delivery and is about to run (or running) the handler.
    Started,
    /// The handler returned normally.
    Success { result: serde_json::Value },
    /// The handler failed, panicked, or was never found.
    Failure { error: TaskFailure },
}

impl TaskStatus {
    pub fn state(&self) -> TaskState {
        match self {
            TaskStatus::Pending => TaskState::Pending,
            TaskStatus::Started => TaskState::Started,
            TaskStatus::Success { .. } => TaskState::Success,
            TaskStatus::Failure { .. } => TaskState::Failure,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

/// The entry kept in the result store, keyed by task id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_name: String,
    #[serde(flatten)]
    pub status: TaskStatus,
    /// Worker that most recently moved the task to STARTED.
    #[serde(default)]
    pub worker: Option<WorkerId>,
    /// Number of times a worker has started executing this task.
    #[serde(default)]
    pub attempts: u32,
    pub created_at: u64,
    pub updated_at: u64,
}

impl TaskRecord {
    /// The initial record written by the producer before publishing.
    pub fn pending(envelope: &TaskEnvelope) -> Self {
        let now = now_ms();
        Self {
            id: envelope.id.clone(),
            task_name: envelope.task_name.clone(),
            status: TaskStatus::Pending,
            worker: None,
            attempts: 0,
            created_at: envelope.created_at.min(now),
            updated_at: now,
        }
    }

    pub fn state(&self) -> TaskState {
        self.status.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        match &self.status {
            TaskStatus::Success { result } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&TaskFailure> {
        match &self.status {
            TaskStatus::Failure { error } => Some(error),
            _ => None,
        }
    }

    /// Moves the record to `next`, refusing any transition that would go back
    /// to an earlier state in the lifecycle order.
    ///
    /// STARTED -> STARTED (redelivery after a crash) and terminal -> terminal
    /// (duplicate execution, last write wins) are both legal.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), Error> {
        let from = self.state();
        let to = next.state();
        if to.rank() < from.rank() {
            return Err(Error::IllegalTransition {
                task_id: self.id.clone(),
                from,
                to,
            });
        }

        self.status = next;
        self.updated_at = now_ms().max(self.updated_at);
        Ok(())
    }

    /// Marks the record STARTED on behalf of `worker`, counting the attempt.
    pub fn start(&mut self, worker: &WorkerId) -> Result<(), Error> {
        self.transition(TaskStatus::Started)?;
        self.worker = Some(worker.clone());
        self.attempts += 1;
        Ok(())
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
