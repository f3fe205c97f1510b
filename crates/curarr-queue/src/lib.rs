// SPDX-License-Identifier: GPL-3.0-or-later
pub mod handlers;
pub mod scheduler;
pub mod worker;

pub use handlers::{dispatch, JobContext};
pub use scheduler::Scheduler;
pub use worker::WorkerPool;
