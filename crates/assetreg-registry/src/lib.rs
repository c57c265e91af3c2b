//! Registry controller for assetreg.
//!
//! # Overview
//!
//! `assetreg-registry` ties the gatherer to the in-memory index and delivers
//! change notifications. Key features:
//!
//! - **Ticked ingestion** with a time budget that yields to priority callers
//! - **Deferred containers** whose types are still loading
//! - **Designated-thread events** with an ordered queue for other threads
//! - **Queries and mutations** behind one priority-aware lock
//! - **Snapshots** via save, load and append
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use assetreg_core::{AssetFilter, RegistryConfig, StaticTypeRegistry};
//! use assetreg_registry::{RegistryController, RegistryEvent};
//!
//! let types = Arc::new(StaticTypeRegistry::with_types([("Mesh", None)]));
//! let registry = RegistryController::new(RegistryConfig::default(), types).unwrap();
//! registry.add_listener(|event: &RegistryEvent| println!("{}", event.name()));
//! registry
//!     .add_mount_point("/data/content".as_ref(), "/Game")
//!     .unwrap();
//! registry.start().unwrap();
//! registry.run_until_idle(Some(Duration::from_secs(30)));
//!
//! let meshes = registry
//!     .get_assets(&AssetFilter::new().with_type("Mesh", true))
//!     .unwrap();
//! println!("{} meshes", meshes.len());
//! ```

mod controller;
mod events;
mod lock;
mod state;
mod tick;

pub use controller::{
    ManageContext, ManageDecision, RegistryController, ScanFlags, ScanSummary, TickStatus,
};
pub use events::{
    Broadcaster, DeferredEvents, EventContext, ListenerId, ProgressUpdate, RegistryEvent,
};
pub use lock::InterfaceLock;
pub use state::{ApplyCounts, GENERATED_TYPE_TAG, PARENT_TYPE_TAG, Phase};
pub use tick::{EarlyExit, TickBudget};
