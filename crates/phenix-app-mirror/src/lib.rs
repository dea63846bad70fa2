//! phenix-app-mirror - traffic mirroring for phenix experiments
//!
//! Copies traffic seen on selected experiment VLANs to a monitoring
//! interface on each target VM, either through GRE/ERSPAN tunnels on a
//! dedicated mirror network (direct GRE) or through OVS tunnels and
//! OpenFlow rules on the experiment bridge (indirect).
//!
//! The app is driven by phenix once per lifecycle phase:
//!
//! - `configure`: assigns mirror-network addresses to target interfaces
//! - `post-start`: creates taps, tunnels, flows and mirrors
//! - `cleanup`: removes what post-start created

pub mod commands;
pub mod config;
pub mod driver;
pub mod mirror_mgr;
pub mod mirror_net;
pub mod names;
pub mod plan;
pub mod taps;
pub mod types;

pub use config::RuntimeConfig;
pub use driver::{ExecSummary, Phase, PhaseDriver};
pub use mirror_mgr::MirrorMgr;
pub use mirror_net::MirrorNet;
pub use plan::{OnError, Plan, PlanStep};
pub use types::{Experiment, MirrorAppMetadata, MirrorHostMetadata, APP_NAME};
