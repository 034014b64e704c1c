//! Service and terminal configuration

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name prefix of UICC terminals (`SIM1`, `SIM2`, ...)
pub const UICC_TERMINAL: &str = "SIM";
/// Name prefix of embedded secure element terminals (`eSE1`, ...)
pub const ESE_TERMINAL: &str = "eSE";

/// Environment prefix for configuration overrides
pub const ENV_PREFIX: &str = "NEXUM_SE_";

const fn default_max_response_chain() -> usize {
    256
}

/// Configuration of a whole service
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Terminals in registry order
    #[serde(default)]
    pub terminals: Vec<TerminalConfig>,
}

impl ServiceConfig {
    /// Load from a TOML file, with `NEXUM_SE_` environment overrides
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the sources cannot be merged into a
    /// valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract::<Self>()
            .map_err(|e| Error::Config(e.to_string()))?
            .validated()
    }

    /// Parse from a TOML string
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for malformed or invalid input.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Figment::from(Toml::string(toml))
            .extract::<Self>()
            .map_err(|e| Error::Config(e.to_string()))?
            .validated()
    }

    /// Configuration of the terminal called `name`
    pub fn terminal(&self, name: &str) -> Option<&TerminalConfig> {
        self.terminals.iter().find(|t| t.name == name)
    }

    fn validated(self) -> Result<Self> {
        for (i, terminal) in self.terminals.iter().enumerate() {
            if terminal.name.is_empty() {
                return Err(Error::Config(format!("terminal #{i} has no name")));
            }
            if self.terminals[..i].iter().any(|t| t.name == terminal.name) {
                return Err(Error::Config(format!(
                    "duplicate terminal name: {}",
                    terminal.name
                )));
            }
        }
        Ok(self)
    }
}

/// Configuration of one terminal
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TerminalConfig {
    /// Terminal name, e.g. `SIM1` or `eSE1`
    pub name: String,

    /// Packages that receive full access without consulting the rules
    #[serde(default)]
    pub privileged_packages: Vec<String>,

    /// Maximum number of GET RESPONSE rounds for one command
    #[serde(default = "default_max_response_chain")]
    pub max_response_chain: usize,

    /// Whether clients may open the basic channel of a UICC terminal
    #[serde(default)]
    pub allow_uicc_basic_channel: bool,
}

impl TerminalConfig {
    /// Create a configuration with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            privileged_packages: Vec::new(),
            max_response_chain: default_max_response_chain(),
            allow_uicc_basic_channel: false,
        }
    }

    /// Grant full access to `package`
    pub fn with_privileged_package(mut self, package: impl Into<String>) -> Self {
        self.privileged_packages.push(package.into());
        self
    }

    /// Set the GET RESPONSE round limit
    pub const fn with_max_response_chain(mut self, max: usize) -> Self {
        self.max_response_chain = max;
        self
    }

    /// Allow or forbid basic channels on a UICC terminal
    pub const fn with_uicc_basic_channel(mut self, allow: bool) -> Self {
        self.allow_uicc_basic_channel = allow;
        self
    }

    /// Whether this terminal is a UICC
    pub fn is_uicc(&self) -> bool {
        self.name.starts_with(UICC_TERMINAL)
    }

    /// Whether `package` bypasses the access rules
    pub fn is_privileged(&self, package: &str) -> bool {
        self.privileged_packages.iter().any(|p| p == package)
    }
}
