// ADAPT -- RUNTIME KNOB CONTROL FOR HOT FUNCTIONS
//
// A FUNCTION EXPOSES KNOBS. EVERY CALL RUNS UNDER ONE CONFIGURATION CHOSEN
// FROM A PRECOMPUTED SCHEDULE; MEASURED RESULTS FEED A DECAYING OVERLOAD
// ESTIMATE; WHEN THE SCHEDULE RUNS OUT, A SOLVER PLANS THE NEXT ONE AGAINST
// THE INTENT'S CONSTRAINTS AND OBJECTIVE.
//
//   ControllableFunction::execute
//     -> Scheduler::next_configuration -> (PLAN VIA Solver WHEN EXHAUSTED)
//     -> FUNCTION BODY
//     -> Scheduler::update_statistics -> OverloadPredictor::update
//
// EVERYTHING HERE IS PURE RUST AND TESTABLE OFFLINE.

pub mod clock;
pub mod config;
pub mod controlled;
pub mod error;
pub mod history;
pub mod intent;
pub mod knob;
pub mod linalg;
pub mod predictor;
pub mod scheduler;
pub mod solver;
pub mod space;

pub use config::AdaptConfig;
pub use controlled::{ControllableFunction, FunctionBody, Measured, LATENCY_MEASURE};
pub use error::{AdaptError, PlanningError, Result};
pub use history::{HistorySink, MeasureLog, MeasureRecord};
pub use intent::{Bound, Comparison, ConstraintSet, Direction, Intent, IntentBuilder, Objective};
pub use knob::{KnobRange, KnobValue, ResolvedKnob};
pub use predictor::{OverloadPredictor, Predictor, PredictorSnapshot};
pub use scheduler::{Controller, Phase, Scheduler};
pub use solver::{LinearRow, PlanProblem, Solver, TimeShareSolver};
pub use space::{ConfigSpace, Configuration};
