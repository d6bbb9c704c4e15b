pub mod decision;
pub mod policy;

pub use decision::{Decision, ReasoningTrace, Severity};
pub use policy::{Action, EnforcementPolicy, RuleDef, RuleDocument, RuleFile};
