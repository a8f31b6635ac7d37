//! Process lifecycle: run profiles, the process registry and the platform
//! controller that actually starts and signals OS processes.

pub mod controller;
pub mod launcher;
pub mod profiles;
pub mod registry;
pub mod types;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::NativeController;
#[cfg(windows)]
pub use windows::NativeController;

pub use controller::ProcessController;
pub use profiles::{ProfileMap, ProfileStore};
pub use registry::ProcessRegistry;
pub use types::{ProcessRecord, ProcessTable, RunProfile};
