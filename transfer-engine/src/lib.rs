pub mod drill;
pub mod state;

pub use drill::{run_drill, DrillPlan, DrillSummary};
pub use state::{BookingEngine, EngineError};
