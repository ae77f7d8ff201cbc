//! Cyclic module interface
//!
//! The processing modules of `radiom_exec` which run every cycle (heading fusion, bearing control
//! and the radiometer supervisor) implement [`State`]. Modules which only hold configuration and a
//! few counters (the scheduler, the battery monitor) are plain structs.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use crate::session::Session;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A module stepped once per cycle by the orchestrator.
///
/// `proc` is given the time of the cycle inside its input data and must not read the clock
/// itself, so that a whole cycle can be replayed with explicit times.
pub trait State {
    /// What `init` needs, usually the parameter file path plus anything fixed at start-up.
    type InitData;

    type InitError;

    /// Everything the module reads during one cycle.
    type InputData;

    /// What the cycle produced for the rest of the loop, e.g. a motor command.
    type OutputData;

    /// Diagnostics of the cycle, kept in the data store and folded into health reports.
    type StatusReport;

    /// Modules which cannot fail during a cycle use `std::convert::Infallible`.
    type ProcError;

    /// Load parameters and reset the module ready for the first cycle.
    fn init(&mut self, init_data: Self::InitData, session: &Session)
        -> Result<(), Self::InitError>;

    /// Run one cycle.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;
}
