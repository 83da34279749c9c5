//! Self-tuning controller for the Landmark engine.
//!
//! Each cycle of the [`TuningLoop`] runs four phases:
//!
//! - **Observe**: read the trailing metrics window and the index state
//! - **Hypothesize**: run rule-based [`Detector`]s, rank the proposals
//! - **Act**: execute safe hypotheses, queue risky ones for approval,
//!   execute what was approved since the last cycle
//! - **Learn**: score executed actions, update atom importance, pick the
//!   next delay
//!
//! The engine is reached only through the [`TuningTarget`] trait.
//!
//! # Example
//!
//! ```ignore
//! use landmark_tuning::TuningLoop;
//!
//! let tuning = Arc::new(TuningLoop::new(settings, target, metrics, storage)?);
//! let report = tuning.run_cycle().await?;
//! for id in &report.queued {
//!     println!("awaiting approval: {}", id);
//! }
//!
//! tokio::spawn(tuning.clone().run(shutdown.clone()));
//! ```

mod approvals;
mod controller;
pub mod detectors;
mod error;
mod executor;
mod learner;
mod status;
mod target;

#[cfg(test)]
mod testing;

pub use approvals::{ApprovalQueue, ApprovedAction, Executable, SubmitOutcome};
pub use controller::{CycleReport, TuningLoop};
pub use detectors::{default_detectors, Detector, Observation};
pub use error::{ActionExecutionFailure, LearningDivergence, TuningError};
pub use executor::{ActionExecutor, ExecutionEffect};
pub use learner::{next_delay, outcome_score, Learner, PendingMeasurement, WeightUpdate};
pub use status::{CycleResult, LoopStatus, StatusRegistry};
pub use target::{IndexObservation, TuningTarget};
