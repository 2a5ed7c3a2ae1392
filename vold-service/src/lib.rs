// SPDX-License-Identifier: GPL-3.0-only

//! Volume and disk lifecycle core
//!
//! [`VolumeManager`] owns every [`Disk`] and [`Volume`] and serializes all
//! lifecycle verbs behind one registry lock. Collaborators (external tools,
//! mounts, crypto, the overlay daemon, process namespaces, AppFuse) are
//! injected through [`Adapters`], so the whole core runs against fakes in
//! tests.

pub mod config;
pub mod context;
pub mod disk;
pub mod disk_source;
pub mod error;
pub mod keys;
pub mod maintenance;
pub mod manager;
pub mod volume;

pub use config::{ConfigError, DaemonConfig};
pub use context::{Adapters, Context};
pub use disk::{BusClass, Disk};
pub use disk_source::DiskSource;
pub use error::ServiceError;
pub use keys::KeyStore;
pub use maintenance::{Maintenance, PassState};
pub use manager::VolumeManager;
pub use volume::{Volume, VolumeBase, VolumeKind};
