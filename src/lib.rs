//! rthrottle - sliding-window task admission throttling on Tokio.
//!
//! Work is submitted as futures, optionally tagged with a channel key. A
//! policy computes the earliest time each task may run without breaking any
//! global rate or the channel's own rate, and a dispatcher runs it then:
//! either on its own timer (`Scheduled`) or through a bounded FIFO that keeps
//! submission order and sheds load when full (`Queued`).

pub mod clock;
pub mod dispatch;
pub mod error;
pub mod options;
pub mod policy;
pub mod rate;
pub mod throttler;

// Re-export core types for user convenience
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use dispatch::{task, DispatchStats, Dispatcher, QueuedDispatcher, ScheduledDispatcher, Task, TaskHandle, TaskState};
pub use error::ThrottleError;
pub use options::{DispatchMode, QueueOptions, DEFAULT_QUEUE_CAPACITY};
pub use policy::{Admission, ChannelKey, ChannelRatePolicy, MultiRatePolicy, Policy, ThrottlePolicy};
pub use rate::Rate;
pub use throttler::{Throttler, ThrottlerBuilder};

