//! Shared data model for the vigil alerting core.
//!
//! Defines the label/series model, the alert status state machine, the
//! alert rule definition, and the combining boolean expression evaluated
//! over per-sub-expression query results.

pub mod expr;
pub mod types;
