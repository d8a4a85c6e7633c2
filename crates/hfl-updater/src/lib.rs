//! Update engine for the hotfix launcher.
//!
//! This crate decides, on every start of the launcher, whether to replace the
//! launcher itself, install a new major release, or patch individual files,
//! and then hands over to the target program.
//!
//! # Overview
//!
//! - [`ManifestFetcher`] reads the server's version metadata.
//! - [`ArtifactDownloader`] fetches artifacts and verifies their digests.
//! - [`AtomicReplacer`] moves staged files into place.
//! - [`SelfUpdateBootstrapper`] hands the launcher's own replacement to a helper script.
//! - [`Orchestrator`] runs the decision state machine and reports [`UpdateEvent`]s.
//!
//! Network access goes through the [`HttpTransport`] trait and process
//! creation through the [`Launcher`] trait, so a run can be driven entirely
//! from tests.
//!
//! # Example
//!
//! ```no_run
//! use hfl_updater::{Orchestrator, UpdaterSettings, UpdateEvent};
//!
//! fn main() -> hfl_updater::Result<()> {
//!     let settings = UpdaterSettings::load_or_default(&UpdaterSettings::config_path())?;
//!     let handle = Orchestrator::with_defaults(settings)?
//!         .spawn()
//!         .expect("failed to start update worker");
//!
//!     for event in handle.events.iter() {
//!         if let UpdateEvent::Progress { percent, text } = event {
//!             println!("{percent:?} {text}");
//!         }
//!     }
//!
//!     let outcome = handle.join();
//!     if outcome.is_handoff() {
//!         std::process::exit(0);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod error;
pub mod events;
pub mod version;

// Pipeline
pub mod bootstrap;
pub mod digest;
pub mod download;
pub mod manifest;
pub mod orchestrator;
pub mod replace;
pub mod state;

// Side effects
pub mod launch;
pub mod report;
pub mod transport;

pub use bootstrap::{SelfUpdateBootstrapper, SelfUpdateHandoff};
pub use config::{BasicAuth, LaunchPolicy, SelfUpdateSettings, UpdaterSettings};
pub use digest::DigestAlgorithm;
pub use download::ArtifactDownloader;
pub use error::{Result, UpdateError};
pub use events::{EventSink, Stage, UpdateEvent};
pub use launch::{DetachedLauncher, LaunchRequest, Launcher};
pub use manifest::{ArtifactDescriptor, ManifestFetcher, SelfUpdateInfo, UpdateManifest};
pub use orchestrator::{FollowUp, InterruptFlag, Orchestrator, UpdateHandle, UpdateOutcome};
pub use replace::AtomicReplacer;
pub use report::RunReport;
pub use state::LocalState;
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use version::{DottedVersion, VersionComparator};

/// Current version of the launcher.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
