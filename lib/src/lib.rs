//! Ambient support crate for the deadline-scheduling core.
//!
//! Carries the leaf collaborators the scheduler depends on but that are not
//! themselves scheduling policy: leveled logging, a ticket-lock mutex,
//! lazy-init statics, and the CPU-online registry / monotonic clock that
//! model the topology and time-source collaborators of the runtime this
//! crate was extracted from.
//!
//! `no_std` on real targets; built with `std` under `cfg(test)` so the
//! ordinary test harness can run on the host.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod clock;
pub mod klog;
pub mod once_lock;
pub mod pcr;
pub mod spinlock;

pub use clock::{ClockSource, CycleSource, MonotonicClock};
pub use klog::{KlogLevel, klog_get_level, klog_register_backend, klog_set_level};
pub use once_lock::OnceLock;
pub use pcr::{MAX_CPUS, cpu_count, is_cpu_online, mark_cpu_offline, mark_cpu_online};
pub use spinlock::{IrqMutex, IrqMutexGuard, IrqRwLock, IrqRwLockReadGuard, IrqRwLockWriteGuard};
