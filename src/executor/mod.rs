//! Task Lifecycle Module
//!
//! The contract between producer, broker queue, worker and result store.
//!
//! ## Lifecycle
//! Every task moves through `PENDING -> STARTED -> {SUCCESS, FAILURE}`:
//! 1. **Submission**: the `Producer` assigns a `TaskId`, writes a PENDING record
//!    and publishes an envelope. The caller gets the id back immediately.
//! 2. **Execution**: a `TaskExecutor` loop consumes the envelope, writes STARTED,
//!    runs the handler from its `TaskRegistry` and writes the terminal record.
//! 3. **Polling**: callers read the record through the `StatusReader` until it
//!    is terminal. There is no push notification.
//!
//! Delivery is at-least-once, so a handler can run more than once for the same
//! id. Concurrent duplicate runs both write their terminal record; the last
//! write wins.
//!
//! ## Submodules
//! - **`types`**: identifiers, envelope, record and the state order.
//! - **`registry`**: maps task names to handlers.
//! - **`tasks`**: built-in handlers (`divide`, `add`, `sleep`).
//! - **`producer`**: task submission.
//! - **`executor`**: the worker pool and its consume loop.
//! - **`status`**: record reads and caller-side polling.
//! - **`protocol`**/**`handlers`**: the HTTP surface for submit and status.

pub mod executor;
pub mod handlers;
pub mod producer;
pub mod protocol;
pub mod registry;
pub mod status;
pub mod tasks;
pub mod types;
