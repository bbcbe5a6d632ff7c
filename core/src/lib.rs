//! Deadline (EDF+CBS) scheduling class, timer wheel, and PELT load tracker.
//!
//! `no_std` on real targets; built with `std` under `cfg(test)` so the
//! ordinary test harness can run on the host.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod pelt;
pub mod scheduler;
pub mod tick;
pub mod timer;

pub use config::SchedConfig;
pub use scheduler::errors::SchedError;
pub use scheduler::task::{CpuId, Task, TaskId};
pub use scheduler::{CpuStats, DomainStats, SchedulerState};
pub use tick::TickDevice;
pub use timer::TimerBase;
