//! Workflow step machines
//!
//! The promote and demote workflows are linear chains of named steps. The
//! orchestrator drives a chain with a single advance loop; each step's
//! effect is a bounded exec or SQL call, and a failed step maps to exactly
//! one error kind. Naming the steps keeps failures attributable: an
//! operator reading `promotion failed at step verify` knows how far the
//! cluster got.

/// Steps of a promote workflow, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteStep {
    /// Checkpoint the old primary and push it toward standby. Best-effort.
    Quiesce,
    /// `pg_wal_replay_resume()` on the target; a paused standby never
    /// finishes promotion.
    ResumeReplay,
    /// Remove the target's standby signal.
    ClearStandbySignal,
    /// `pg_ctl promote` on the target.
    Promote,
    /// Poll until the target reports it left recovery.
    Verify,
    /// Rebuild every other reachable node as a standby of the target.
    Reconfigure,
    /// Commit the new role hints to the topology.
    Finalize,
}

impl PromoteStep {
    /// First step of the chain.
    pub const FIRST: PromoteStep = PromoteStep::Quiesce;

    pub fn name(&self) -> &'static str {
        match self {
            PromoteStep::Quiesce => "quiesce",
            PromoteStep::ResumeReplay => "resume_replay",
            PromoteStep::ClearStandbySignal => "clear_standby_signal",
            PromoteStep::Promote => "promote",
            PromoteStep::Verify => "verify",
            PromoteStep::Reconfigure => "reconfigure",
            PromoteStep::Finalize => "finalize",
        }
    }

    /// The step after this one; `None` past Finalize.
    pub fn next(self) -> Option<PromoteStep> {
        match self {
            PromoteStep::Quiesce => Some(PromoteStep::ResumeReplay),
            PromoteStep::ResumeReplay => Some(PromoteStep::ClearStandbySignal),
            PromoteStep::ClearStandbySignal => Some(PromoteStep::Promote),
            PromoteStep::Promote => Some(PromoteStep::Verify),
            PromoteStep::Verify => Some(PromoteStep::Reconfigure),
            PromoteStep::Reconfigure => Some(PromoteStep::Finalize),
            PromoteStep::Finalize => None,
        }
    }
}

/// Steps applied to one node during demotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoteStep {
    /// Create the standby signal.
    WriteStandbySignal,
    /// Restart the server so the signal takes effect.
    Restart,
    /// Poll until the node reports recovery.
    Verify,
}

impl DemoteStep {
    pub const FIRST: DemoteStep = DemoteStep::WriteStandbySignal;

    pub fn name(&self) -> &'static str {
        match self {
            DemoteStep::WriteStandbySignal => "write_standby_signal",
            DemoteStep::Restart => "restart",
            DemoteStep::Verify => "verify",
        }
    }

    pub fn next(self) -> Option<DemoteStep> {
        match self {
            DemoteStep::WriteStandbySignal => Some(DemoteStep::Restart),
            DemoteStep::Restart => Some(DemoteStep::Verify),
            DemoteStep::Verify => None,
        }
    }
}
