pub mod api;
pub mod audit;
pub mod backend;
pub mod cache;
pub mod config;
pub mod domain;
pub mod observability;
pub mod pipeline;
pub mod policy;
pub mod rules;
pub mod sanitizer;

pub use config::Config;
pub use domain::{Decision, Severity};
pub use observability::MetricsSnapshot;
pub use pipeline::{DecideError, Pipeline};
pub use rules::RuleSet;
