//! Concrete [`Adapter`](crate::adapter::Adapter) implementations for each
//! backend kind the engine can pool.
//!
//! `worker` and `process` are always available; `container` and `pod` sit
//! behind their matching Cargo features since they pull in a daemon/cluster
//! client each.

pub mod process;
pub mod worker;

#[cfg(feature = "container")]
pub mod container;

#[cfg(feature = "pod")]
pub mod pod;

pub use process::ProcessAdapter;
pub use worker::WorkerAdapter;

#[cfg(feature = "container")]
pub use container::ContainerAdapter;

#[cfg(feature = "pod")]
pub use pod::PodAdapter;
