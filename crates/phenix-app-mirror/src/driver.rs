//! Phase driver: maps a lifecycle phase to its plan builder and dispatches
//! the resulting plan.

use std::fmt;

use tracing::{debug, error, info, info_span, warn, Instrument};

use phenix_app_common::{AppResult, Dispatcher, Inventory, Resolver};

use crate::mirror_mgr::MirrorMgr;
use crate::plan::{OnError, Plan};
use crate::types::Experiment;

/// Lifecycle phases the mirror app acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Configure,
    PostStart,
    Cleanup,
}

impl Phase {
    /// Phase names as passed by phenix.
    pub const TABLE: [(&'static str, Phase); 3] = [
        ("configure", Phase::Configure),
        ("post-start", Phase::PostStart),
        ("cleanup", Phase::Cleanup),
    ];

    /// Looks up a phase by name. Phases the app does not handle return
    /// `None` and are passed through untouched by the caller.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, phase)| *phase)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Configure => "configure",
            Phase::PostStart => "post-start",
            Phase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of dispatching a plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecSummary {
    /// Steps that were sent successfully.
    pub dispatched: usize,
    /// Steps whose failure was logged and skipped.
    pub failed: usize,
}

pub struct PhaseDriver<'a> {
    dispatcher: &'a dyn Dispatcher,
    mgr: MirrorMgr<'a>,
}

impl<'a> PhaseDriver<'a> {
    pub fn new(
        dispatcher: &'a dyn Dispatcher,
        inventory: &'a dyn Inventory,
        resolver: &'a dyn Resolver,
    ) -> Self {
        Self {
            dispatcher,
            mgr: MirrorMgr::new(inventory, resolver),
        }
    }

    /// Runs one phase against the experiment.
    ///
    /// `configure` only edits the experiment. The other phases build their
    /// full plan first, so an error while planning dispatches nothing.
    pub async fn run(&self, phase: Phase, exp: &mut Experiment) -> AppResult<ExecSummary> {
        let span = info_span!("phase", phase = %phase, experiment = %exp.name());

        async move {
            match phase {
                Phase::Configure => {
                    self.mgr.configure(exp)?;
                    Ok(ExecSummary::default())
                }
                Phase::PostStart => {
                    let plan = self.mgr.post_start(exp).await?;
                    self.execute(plan).await
                }
                Phase::Cleanup => {
                    let plan = self.mgr.cleanup(exp)?;
                    self.execute(plan).await
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Sends every step in order. A failed fatal step stops the plan and
    /// returns its error; later steps are not sent.
    pub async fn execute(&self, plan: Plan) -> AppResult<ExecSummary> {
        let mut summary = ExecSummary::default();

        for step in plan {
            match self.dispatcher.send(&step.dest, &step.command).await {
                Ok(()) => {
                    debug!(host = %step.dest, command = %step.command, "{}", step.context);
                    summary.dispatched += 1;
                }
                Err(e) => match step.on_error {
                    OnError::Fatal => {
                        error!(host = %step.dest, error = %e, "Failed {}", step.context);
                        return Err(e);
                    }
                    OnError::Log => {
                        warn!(host = %step.dest, error = %e, "Failed {}", step.context);
                        summary.failed += 1;
                    }
                },
            }
        }

        info!(
            dispatched = summary.dispatched,
            failed = summary.failed,
            "Plan dispatched"
        );

        Ok(summary)
    }
}
