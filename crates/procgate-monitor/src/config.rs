//! Monitor configuration

use std::path::{Path, PathBuf};

use procgate_core::{ProcGateError, Result};

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Package database consumed on refresh
    pub package_db: PathBuf,
    /// Application interpreter binary (base path, without the 32/64 suffix)
    pub app_process: PathBuf,
    /// Agent program invoked as `<agent> <pid>` for each hand-off
    pub agent: PathBuf,
    /// Command-line prefix identifying spawner processes
    pub spawner_prefix: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            package_db: PathBuf::from("/data/system/packages.xml"),
            app_process: PathBuf::from("/system/bin/app_process"),
            agent: PathBuf::new(),
            spawner_prefix: "zygote".to_string(),
        }
    }
}

impl MonitorConfig {
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent.as_os_str().is_empty() {
            return Err(ProcGateError::InvalidConfig(
                "agent program must be set".to_string(),
            ));
        }
        if self.spawner_prefix.is_empty() {
            return Err(ProcGateError::InvalidConfig(
                "spawner prefix cannot be empty".to_string(),
            ));
        }
        if self.package_db.file_name().is_none() {
            return Err(ProcGateError::InvalidConfig(format!(
                "package database path has no file name: {}",
                self.package_db.display()
            )));
        }
        Ok(())
    }

    /// Interpreter binaries to watch. Two layouts exist: a suffixed pair
    /// (`app_process32`, optionally `app_process64`) or the bare path.
    pub fn interpreter_candidates(&self) -> Vec<PathBuf> {
        let p32 = path_with_suffix(&self.app_process, "32");
        if p32.exists() {
            let mut candidates = vec![p32];
            let p64 = path_with_suffix(&self.app_process, "64");
            if p64.exists() {
                candidates.push(p64);
            }
            candidates
        } else {
            vec![self.app_process.clone()]
        }
    }
}

/// Builder pattern for monitor configuration
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    pub fn package_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.package_db = path.into();
        self
    }

    pub fn app_process(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.app_process = path.into();
        self
    }

    pub fn agent(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.agent = path.into();
        self
    }

    pub fn spawner_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.spawner_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<MonitorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}
