mod audit;
mod state;
mod store;

pub use audit::{OpenBlock, SubFileStatus};
pub use state::{JobState, TargetState};
pub use store::{JobId, JobTracker, SqliteTracker, WorkflowStaleGroup};
