pub mod log;
pub mod sim_loop;
pub mod tasks;
pub mod time;

pub use sim_loop::SimLoop;
pub use tasks::{Executor, Scope, TaskError, TaskFuture};
pub use time::{Clock, IntervalTimer, ManualClock, SystemClock, Timestamp};
