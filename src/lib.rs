pub mod driver;
pub mod early_stopper;
pub mod engine;
pub mod entities;
pub mod error;
pub mod holdout;
pub mod lazy_heap;
pub mod lookup;
pub mod metrics;

pub use driver::{AssignmentRecord, Driver, DistrictRecord, ExpectableRun, SchoolRecord};
pub use engine::{EarlyStopperParams, GreedyEngine, GreedyParams, Move, NoopObserver, RunObserver};
pub use entities::{District, DistrictId, EntityGraph, School, SchoolId};
pub use error::EngineError;
pub use lookup::Lookup;
pub use metrics::RunMetrics;
