//! Rule set and the derived UID → process-name map

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, warn};

use crate::packages::parse_record;

/// A single gating rule: processes of `package` presenting the exact
/// command line `process` are targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub package: String,
    pub process: String,
}

impl Rule {
    pub fn new(package: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            process: process.into(),
        }
    }
}

/// Holds the rule set and the UID → process-name map derived from it.
///
/// The map is rebuilt in full by [`RuleStore::refresh_from_package_db`];
/// rule mutations alone do not touch it, so callers refresh after changing
/// rules. Map keys are app-base UIDs (user offset already stripped).
#[derive(Debug, Default)]
pub struct RuleStore {
    rules: HashSet<Rule>,
    uid_map: HashMap<u32, Vec<String>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire rule set.
    pub fn set_rules(&mut self, rules: impl IntoIterator<Item = Rule>) {
        self.rules = rules.into_iter().collect();
    }

    pub fn add_rule(&mut self, rule: Rule) -> bool {
        self.rules.insert(rule)
    }

    pub fn remove_rule(&mut self, rule: &Rule) -> bool {
        self.rules.remove(rule)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Process names registered for an app-base UID. Empty if absent.
    pub fn lookup(&self, uid: u32) -> &[String] {
        self.uid_map.get(&uid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// True if `name` is a registered process name for `uid`.
    pub fn matches(&self, uid: u32, name: &str) -> bool {
        self.lookup(uid).iter().any(|p| p == name)
    }

    /// Rebuild the UID map from the package database.
    ///
    /// Only records whose `name` matches a rule's package are retained.
    /// Records that fail to parse are skipped. An unreadable file clears
    /// the map: stale UIDs must not keep matching after the database is
    /// replaced underneath us.
    pub fn refresh_from_package_db(&mut self, path: &Path) {
        let mut map: HashMap<u32, Vec<String>> = HashMap::new();

        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                warn!("rules: cannot read {}: {}", path.display(), e);
                self.uid_map = map;
                return;
            }
        };

        for line in BufReader::new(file).lines() {
            let Ok(line) = line else { break };
            let Some(record) = parse_record(&line) else {
                continue;
            };
            for rule in self.rules.iter().filter(|r| r.package == record.name) {
                for &uid in &record.uids {
                    let procs = map.entry(uid % 100000).or_default();
                    if !procs.contains(&rule.process) {
                        procs.push(rule.process.clone());
                    }
                }
            }
        }

        debug!(
            "rules: {} uid(s) mapped from {}",
            map.len(),
            path.display()
        );
        self.uid_map = map;
    }

    /// Drop all rules and the derived map.
    pub fn clear(&mut self) {
        self.rules.clear();
        self.uid_map.clear();
    }
}
