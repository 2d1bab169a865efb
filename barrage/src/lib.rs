#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod aggregator;
mod controller;
mod error;
mod executor;
mod pool;
mod report;
mod telemetry;
mod timer;
mod virtual_user;

pub use aggregator::MetricsAggregator;
pub use controller::{AbortHandle, Progress, RunController, RunMonitor};
pub use error::{InternalError, RunError};
pub use executor::{RequestExecutor, Requester};
pub use report::{Report, ThresholdReport};

pub mod prelude {
    pub use crate::{AbortHandle, Report, RunController, RunError, RunMonitor};
    pub use barrage_core::{
        load_scenario, Executor, RequestTemplate, RunResult, RunState, ScenarioDocument,
        ScenarioSpec, Stage, Threshold, Workload,
    };
}
