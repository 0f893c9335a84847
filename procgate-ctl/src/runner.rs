use console::style;
use log::{debug, info};
use procgate_monitor::{Monitor, MonitorConfig, Rule, Signal, bind_shutdown_signal};
use std::path::PathBuf;

/// Configuration for a monitor run, straight from the CLI
pub struct RunConfig {
    pub rules: Vec<String>,
    pub agent: Option<PathBuf>,
    pub package_db: Option<PathBuf>,
    pub app_process: Option<PathBuf>,
    pub spawner_prefix: Option<String>,
}

pub fn run_monitor(config: RunConfig) -> Result<(), Box<dyn std::error::Error>> {
    let Some(agent) = config.agent else {
        return Err("an agent program is required (--agent PATH)".into());
    };
    if config.rules.is_empty() {
        return Err("at least one rule is required (--rule PKG[:PROC])".into());
    }

    let rules = config
        .rules
        .iter()
        .map(|raw| parse_rule(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = MonitorConfig::builder().agent(agent);
    if let Some(db) = config.package_db {
        debug!("Using package database: {}", db.display());
        builder = builder.package_db(db);
    }
    if let Some(app) = config.app_process {
        debug!("Using interpreter path: {}", app.display());
        builder = builder.app_process(app);
    }
    if let Some(prefix) = config.spawner_prefix {
        debug!("Using spawner prefix: {}", prefix);
        builder = builder.spawner_prefix(prefix);
    }

    let monitor = Monitor::new(builder.build()?)?;

    {
        let state = monitor.state();
        let mut st = state.lock().expect("monitor lock poisoned");
        info!("Installing {} rule(s)", rules.len());
        st.rules.set_rules(rules);
    }

    // Route the usual daemon lifecycle signals into the monitor shutdown
    bind_shutdown_signal(Signal::SIGTERM)?;
    bind_shutdown_signal(Signal::SIGINT)?;

    println!(
        "{} {}",
        style("procgate").green().bold(),
        style("monitor running, Ctrl-C to stop").dim()
    );

    monitor.run()?;
    Ok(())
}

/// Parse `PACKAGE[:PROCESS]`. Everything after the first colon is the
/// process name, which may itself contain colons.
fn parse_rule(raw: &str) -> Result<Rule, String> {
    match raw.split_once(':') {
        Some((pkg, process)) if !pkg.is_empty() && !process.is_empty() => {
            Ok(Rule::new(pkg, process))
        }
        None if !raw.is_empty() => Ok(Rule::new(raw, raw)),
        _ => Err(format!("invalid rule '{}', expected PKG[:PROC]", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_package_rule_uses_package_as_process() {
        let rule = parse_rule("com.x").unwrap();
        assert_eq!(rule.package, "com.x");
        assert_eq!(rule.process, "com.x");
    }

    #[test]
    fn explicit_process_name() {
        let rule = parse_rule("com.x:com.x:push").unwrap();
        assert_eq!(rule.package, "com.x");
        assert_eq!(rule.process, "com.x:push");
    }

    #[test]
    fn empty_parts_are_rejected() {
        assert!(parse_rule("").is_err());
        assert!(parse_rule(":proc").is_err());
        assert!(parse_rule("pkg:").is_err());
    }

    #[test]
    fn run_without_agent_fails() {
        let err = run_monitor(RunConfig {
            rules: vec!["com.x".to_string()],
            agent: None,
            package_db: None,
            app_process: None,
            spawner_prefix: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("agent"));
    }

    #[test]
    fn run_without_rules_fails() {
        let err = run_monitor(RunConfig {
            rules: vec![],
            agent: Some(PathBuf::from("/tmp/agent")),
            package_db: None,
            app_process: None,
            spawner_prefix: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("rule"));
    }
}
