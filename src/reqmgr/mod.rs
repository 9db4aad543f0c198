pub mod cache;
pub mod client;
pub mod error;
pub mod types;

pub use cache::{StatusCache, WorkflowStatusClient};
pub use client::{ReqMgrClient, StatusSource};
pub use error::ReqMgrError;
pub use types::{RequestInfo, WorkflowStatus};
