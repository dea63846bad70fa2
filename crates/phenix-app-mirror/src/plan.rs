//! Command plans.
//!
//! A plan is built in full before anything is dispatched and is consumed
//! once by the phase driver. Each step records whether a dispatch failure
//! aborts the phase or is only logged.

use phenix_app_common::Destination;

/// What a failed dispatch does to the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    /// Stop the phase and report the error.
    Fatal,
    /// Log the error and move on to the next step.
    Log,
}

/// A single command bound to a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub dest: Destination,
    pub command: String,
    pub on_error: OnError,
    /// Human-readable description used in log lines and errors.
    pub context: String,
}

/// Ordered list of steps for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        dest: Destination,
        command: String,
        on_error: OnError,
        context: impl Into<String>,
    ) {
        self.steps.push(PlanStep {
            dest,
            command,
            on_error,
            context: context.into(),
        });
    }

    /// Appends a step whose failure aborts the phase.
    pub fn fatal(&mut self, dest: Destination, command: String, context: impl Into<String>) {
        self.push(dest, command, OnError::Fatal, context);
    }

    /// Appends a step whose failure is only logged.
    pub fn logged(&mut self, dest: Destination, command: String, context: impl Into<String>) {
        self.push(dest, command, OnError::Log, context);
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Commands addressed to `dest`, in plan order.
    pub fn commands_for(&self, dest: &Destination) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| &s.dest == dest)
            .map(|s| s.command.as_str())
            .collect()
    }
}

impl IntoIterator for Plan {
    type Item = PlanStep;
    type IntoIter = std::vec::IntoIter<PlanStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_keeps_order() {
        let mut plan = Plan::new();
        plan.fatal(Destination::host("kvm1"), "tap create a".to_string(), "tap");
        plan.logged(Destination::All, "tap delete a".to_string(), "cleanup");
        plan.logged(Destination::host("kvm1"), "shell true".to_string(), "noop");

        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.commands_for(&Destination::host("kvm1")),
            vec!["tap create a", "shell true"]
        );

        let steps: Vec<PlanStep> = plan.into_iter().collect();
        assert_eq!(steps[0].on_error, OnError::Fatal);
        assert_eq!(steps[1].dest, Destination::All);
        assert_eq!(steps[1].on_error, OnError::Log);
    }

    #[test]
    fn test_empty_plan() {
        assert!(Plan::new().is_empty());
    }
}
