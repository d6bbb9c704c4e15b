use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::rules::RuleSet;

use super::loader::{RuleLoadError, RuleLoader};

/// Watch the rule file and publish new rule sets when its version changes.
pub struct RuleWatcher {
    loader: RuleLoader,
    check_interval: Duration,
    last_version: Option<String>,
}

impl RuleWatcher {
    /// Create a new rule watcher.
    pub fn new(loader: RuleLoader, check_interval: Duration) -> Self {
        RuleWatcher {
            loader,
            check_interval,
            last_version: None,
        }
    }

    /// Load the initial rule set and start polling for changes.
    ///
    /// A failed initial load is returned to the caller; a failed reload
    /// keeps the active rule set in place.
    pub fn start(
        mut self,
    ) -> Result<(watch::Receiver<Arc<RuleSet>>, tokio::task::JoinHandle<()>), RuleLoadError> {
        let (doc, ruleset) = self.loader.load()?;
        info!(
            version = %doc.version,
            rules = ruleset.len(),
            "Loaded initial rule set"
        );
        self.last_version = Some(doc.version);

        let (tx, rx) = watch::channel(Arc::new(ruleset));

        let handle = tokio::spawn(async move {
            let mut ticker = interval(self.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match self.check_for_updates(&tx) {
                    Ok(true) => info!("Rule set reloaded successfully"),
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Error checking for rule updates"),
                }
            }
        });

        Ok((rx, handle))
    }

    /// Check for rule updates and publish if the version changed.
    fn check_for_updates(&mut self, tx: &watch::Sender<Arc<RuleSet>>) -> Result<bool, RuleLoadError> {
        let doc = self.loader.load_document()?;

        if self.last_version.as_ref() == Some(&doc.version) {
            return Ok(false);
        }

        let ruleset = RuleSet::compile(&doc)?;

        info!(
            previous = ?self.last_version,
            version = %doc.version,
            rules = ruleset.len(),
            "Rule version changed"
        );

        self.last_version = Some(doc.version);
        let _ = tx.send(Arc::new(ruleset));

        Ok(true)
    }
}

/// Publish a fixed rule set with no reloading.
pub fn static_rules(ruleset: RuleSet) -> watch::Receiver<Arc<RuleSet>> {
    let (_tx, rx) = watch::channel(Arc::new(ruleset));
    rx
}
