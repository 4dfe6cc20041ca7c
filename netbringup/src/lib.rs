//! # netbringup
//!
//! Async bring-up of a network lab over device consoles.
//!
//! netbringup drives the interactive, prompt-only remote shells of routers and
//! a security appliance over telnet, then finishes the appliance through its
//! management API. One orchestration run walks five phases:
//!
//! 1. load the testbed inventory (fatal on failure)
//! 2. address the orchestration host and add lab routes
//! 3. configure every router concurrently from command templates
//! 4. walk the appliance's first-boot wizard
//! 5. configure the appliance's data interfaces and default route via its API
//!
//! Progress is published on a lock-guarded [`StatusBoard`] that external
//! observers poll.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netbringup::{Orchestrator, Settings, StatusBoard};
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = Orchestrator::new(Settings::default(), StatusBoard::new());
//!     if let Some(summary) = orchestrator.run("testbed.yaml").await {
//!         println!("success: {}", summary.success());
//!     }
//! }
//! ```

pub mod appliance;
pub mod channel;
pub mod config;
pub mod error;
pub mod host;
pub mod inventory;
pub mod orchestrator;
pub mod runner;
pub mod transport;
pub mod wizard;

#[cfg(test)]
mod testing;

pub use channel::{Pattern, PatternBuffer, Session};
pub use config::Settings;
pub use error::{Error, Result};
pub use inventory::{Device, DeviceKind, Inventory};
pub use orchestrator::{
    OrchestrationStatus, OrchestrationStep, Orchestrator, Phase, RunSummary, StatusBoard,
};
pub use transport::{TelnetConfig, TelnetTransport, Transport};
pub use wizard::{Wizard, WizardConfig, WizardState};
