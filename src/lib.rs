//! Research-article triage: collect candidate publications for a query and
//! narrow them by venue, keywords and similarity to a reference work, falling
//! back to the wider set whenever a stage leaves too few articles.

pub mod collector;
pub mod config;
pub mod error;
pub mod filters;
pub mod funnel;
pub mod oracle;
pub mod ranking;
pub mod record;
pub mod report;
pub mod sink;
pub mod validate;
pub mod venue;
pub mod verdict;
pub mod web;

pub use error::{OracleError, TriageError};
pub use funnel::{Funnel, FunnelOutcome, FunnelStage, FunnelTrace, Phase, Reference};
pub use record::{Collection, Column, RawCollection, Record};
