//! cloudtask: rate-limited task dispatch for cloud API clients
//!
//! Every remote call a client makes is wrapped in a [`Task`] and handed to a
//! [`TaskManager`]. One dispatch thread runs tasks in submission order,
//! spacing calls per rate-limit tag; slow calls are handed to a bounded
//! [`ExecutionPool`] and come back as [`PoolFuture`]s, which
//! [`wait_for_futures`] collects in completion order.
//!
//! # Example
//!
//! ```no_run
//! use cloudtask::{RateLimits, DispatcherConfig, TaskManager, Result};
//!
//! fn main() -> Result<()> {
//!     let config = DispatcherConfig {
//!         rate_limits: RateLimits::per_call(0.5),
//!         ..DispatcherConfig::default()
//!     };
//!     let manager = TaskManager::with_config("compute", config);
//!     manager.start()?;
//!
//!     let servers = manager.submit_fn("list-servers", None, || Ok(vec!["web-1"]))?;
//!     assert_eq!(servers, ["web-1"]);
//!
//!     manager.stop();
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/cloudtask")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod runtime;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use runtime::scheduler::{
    is_transient, wait_for_futures, AcceptAll, ApplicationFailure, BatchOutcome, CapturedError,
    ConnectionFailure, DispatchStats, DispatcherConfig, ExecutionPool, ManagerState, PoolFuture,
    RateLimits, ResponseClassifier, RetryCandidate, StatsSnapshot, Task, TaskBuilder, TaskError,
    TaskHooks, TaskManager,
};
pub use util::config::{load_config, ManagerConfig, RateSetting};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = "cloudtask";
