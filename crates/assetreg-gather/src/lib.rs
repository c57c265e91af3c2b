//! Background discovery and gathering for assetreg.
//!
//! # Overview
//!
//! `assetreg-gather` walks mounted directories, finds container files and
//! parses them into provisional records. Key features:
//!
//! - **Worker threads** that run independently of the registry lock
//! - **Parallel parsing** of container units via rayon
//! - **Gather cache** that skips unchanged containers
//! - **Deny list** of namespace globs
//! - **Progress updates** via broadcast channels
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use assetreg_core::{GatherConfig, MountPoint};
//! use assetreg_gather::Gatherer;
//!
//! let config = GatherConfig::builder()
//!     .mount_points(vec![MountPoint::new("/data/content", "/Game")])
//!     .build()
//!     .unwrap();
//! let gatherer = Gatherer::new(config).unwrap();
//! gatherer.start().unwrap();
//! gatherer.wait_for_idle(Some(Duration::from_secs(30)));
//!
//! let batch = gatherer.get_and_trim_results(usize::MAX);
//! println!("Gathered {} containers", batch.containers.len());
//! ```

mod batch;
mod cache;
mod gatherer;
mod mount;
mod progress;
mod reader;

pub use batch::{GatheredContainer, GatheredEdge, ResultBatch};
pub use cache::GatherCache;
pub use gatherer::{GatherFlags, Gatherer};
pub use mount::MountTable;
pub use progress::GatherProgress;
pub use reader::{ContainerReader, ManifestReader, ReadError, ReadOutcome};
