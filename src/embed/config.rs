// Context configuration
// Captured once at creation; the runtime reads `trace` and `gc_stats` from its own cells

use super::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default script name used in backtraces and compile errors
pub const DEFAULT_FILENAME: &str = "(garnet)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Name reported for loaded source
    pub filename: String,
    /// Compile only: `load_string` answers the unexecuted program as a proc
    pub no_exec: bool,
    /// `[VM]` lines on stderr for compile, run and teardown
    pub trace: bool,
    /// `[GC]` lines on stderr after every collection
    pub gc_stats: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filename: DEFAULT_FILENAME.to_string(),
            no_exec: false,
            trace: false,
            gc_stats: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from JSON, e.g. `{"filename": "app.rb", "no_exec": true}`
    pub fn from_json(options: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(options)?;
        config.validate()?;
        Ok(config)
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn no_exec(mut self, no_exec: bool) -> Self {
        self.no_exec = no_exec;
        self
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn gc_stats(mut self, gc_stats: bool) -> Self {
        self.gc_stats = gc_stats;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.filename.is_empty() {
            return Err(Error::Config("filename must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_options_fill_defaults() {
        let config = Config::from_json(r#"{"filename": "app.rb"}"#).unwrap();
        assert_eq!(config.filename, "app.rb");
        assert!(!config.no_exec);
        assert_eq!(Config::from_json("{}").unwrap(), Config::default());
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let error = Config::from_json(r#"{"timeout": 5}"#).unwrap_err();
        assert!(matches!(error, Error::Config(message) if message.contains("timeout")));
    }

    #[test]
    fn test_empty_filename_is_rejected() {
        assert!(matches!(
            Config::from_json(r#"{"filename": ""}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = Config::new().filename("x.rb").no_exec(true).gc_stats(true);
        assert_eq!(config.filename, "x.rb");
        assert!(config.no_exec && config.gc_stats && !config.trace);
    }
}
