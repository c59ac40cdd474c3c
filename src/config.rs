//! Compiler configuration.
//!
//! An explicit struct threaded through [`crate::pipeline::Pipeline::run`]
//! rather than a global singleton. `figment` loads overrides from env/TOML
//! for embedders that want that, but the struct itself is small and most
//! callers will just use [`CompilerConfig::default`].

use serde::{Deserialize, Serialize};

/// Threaded explicitly through the pipeline entry point; never a global.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Bound on recursive nested-`.init` expansion.
    #[serde(default = "default_max_instantiation_depth")]
    pub max_instantiation_depth: usize,

    /// Warning categories promoted to errors for this run.
    #[serde(default)]
    pub warnings_as_errors: bool,

    /// Enables an `IL_DEBUG`-style trace of the lowering value index.
    #[serde(default)]
    pub trace_lowering: bool,
}

fn default_max_instantiation_depth() -> usize {
    crate::components::DEFAULT_MAX_INSTANTIATION_DEPTH
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            max_instantiation_depth: default_max_instantiation_depth(),
            warnings_as_errors: false,
            trace_lowering: std::env::var("IL_DEBUG").is_ok(),
        }
    }
}

impl CompilerConfig {
    /// Loads overrides from `stratalog.toml`/`stratalog.local.toml` and
    /// `STRATALOG_*` environment variables, falling back to `Default` for
    /// anything unset. Library embedders that don't want file/env
    /// discovery should just use [`CompilerConfig::default`] directly.
    pub fn load() -> Result<Self, figment::Error> {
        use figment::providers::{Env, Format, Toml};
        use figment::Figment;

        Figment::from(figment::providers::Serialized::defaults(CompilerConfig::default()))
            .merge(Toml::file("stratalog.toml"))
            .merge(Toml::file("stratalog.local.toml"))
            .merge(Env::prefixed("STRATALOG_"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_depth_matches_spec_bound() {
        let config = CompilerConfig::default();
        assert_eq!(config.max_instantiation_depth, 1000);
        assert!(!config.warnings_as_errors);
    }

    #[test]
    fn load_falls_back_to_defaults_with_no_files_present() {
        let config = CompilerConfig::load().expect("defaults alone must extract cleanly");
        assert_eq!(config.max_instantiation_depth, 1000);
    }
}
