//! procgate-rules: the rule table and its join against the package database
//!
//! A rule names a package and the exact command-line first token its
//! processes present. Joining the rules with the package database produces
//! the UID → process-name map the trace loop classifies against.

pub mod packages;
pub mod store;

pub use packages::PackageRecord;
pub use store::{Rule, RuleStore};
