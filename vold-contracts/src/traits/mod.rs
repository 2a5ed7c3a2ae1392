// SPDX-License-Identifier: GPL-3.0-only

pub mod appfuse;
pub mod command;
pub mod crypto;
pub mod listener;
pub mod overlay;
pub mod process;
pub mod system;

pub use appfuse::AppFuseBridge;
pub use command::{CommandOutput, CommandRunner};
pub use crypto::CryptoBackend;
pub use listener::EventListener;
pub use overlay::{OverlayHandle, OverlayLauncher, OverlayRequest};
pub use process::{ProcessEntry, ProcessTable, RemountPlan};
pub use system::SystemOps;
