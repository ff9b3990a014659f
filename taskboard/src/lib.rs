//! Task board: bounds the latency of synchronous tool calls by moving
//! long-running analyses to a priority-scheduled worker pool with
//! persistent task records and cooperative cancellation.

pub mod board;
pub mod resolver;
pub mod types;

pub use board::HandlerContext;
pub use board::HandlerOutcome;
pub use board::HandlerRegistry;
pub use board::TaskBoard;
pub use board::TaskBoardConfig;
pub use board::TaskHandler;
pub use resolver::Resolution;
pub use resolver::determine_mini_librarians;
pub use types::DEFAULT_TASK_TIMEOUT_SECS;
pub use types::TaskPriority;
pub use types::TaskRecord;
pub use types::TaskResult;
pub use types::TaskStatus;
