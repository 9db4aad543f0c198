//! Drain readiness checks and stale job reconciliation for a workload agent.
//!
//! The tracker's view of a job is cross-checked against the HTCondor queue and
//! the ReqMgr workflow status before anything is written, and every write goes
//! through an operator confirmation.

pub mod cli;
pub mod config;
pub mod error;
pub mod policy;
pub mod probes;
pub mod reconcile;
pub mod reqmgr;
pub mod scheduler;
pub mod tracker;
pub mod ui;
