mod job;
mod result;
mod run;
mod state;

pub use job::{Initiator, InitiatorType, JobSpec, TaskSpec};
pub use result::{RunResult, RunStatus};
pub use run::{JobRun, RunRequest, RunSummary, log_run_id, web_run_id};
pub use state::{StateMachine, Trigger};
