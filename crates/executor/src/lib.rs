//! Bounded-concurrency asynchronous task execution with explicit lifecycle
//! signalling.
//!
//! An [`Executor`] accepts `'static` unit-returning futures, runs at most
//! `capacity` of them concurrently, and queues the rest FIFO. Callers
//! observe its [`RunState`] transitions through one-shot [`Signal`]s rather
//! than polling: [`Executor::on_idle`] fires each time in-flight work drains
//! to zero, [`Executor::on_stop_requested`] fires the moment
//! [`Executor::stop`] is called, and [`Executor::on_stopped`] fires once a
//! requested stop has fully drained.

mod executor;
mod signal;
mod state;
mod task;

pub use executor::{Executor, ExecutorError};
pub use signal::{Signal, SignalWait};
pub use state::RunState;
pub use task::{Task, TaskError};
