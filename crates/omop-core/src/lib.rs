//! Execution core of the OMOP ETL: SQL text helpers, database sessions,
//! the step registry and runner, and the run summary.

pub mod connection;
pub mod memory;
pub mod pg;
pub mod recording;
pub mod registry;
pub mod runner;
pub mod session;
pub mod sql;
pub mod summary;

pub use connection::{ConnectionConfig, Dbms};
pub use pg::PostgresSession;
pub use recording::RecordingSession;
pub use registry::{LazyValue, ResultRegistry, StepValue};
pub use runner::{
    EtlPipeline, NoopObserver, RunReport, Step, StepContext, StepObserver, StepRecord, StepStatus,
};
pub use session::{Row, Session, SessionError, with_transaction};
pub use summary::{RunSummary, SUMMARY_STEP, TableCount, summary_step};
