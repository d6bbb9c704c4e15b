pub mod hot_reload;
pub mod loader;

pub use hot_reload::{static_rules, RuleWatcher};
pub use loader::{load_rules, RuleFormat, RuleLoadError, RuleLoader};
