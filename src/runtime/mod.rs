//! Runtime system
//!
//! This module contains task dispatch, rate limiting and the execution pool.

pub mod scheduler;
