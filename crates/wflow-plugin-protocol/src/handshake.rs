//! Handshake announcement exchanged when a plugin process starts.
//!
//! The host passes a magic cookie and the protocol version through the
//! environment. A plugin that accepts them binds a listener and prints one
//! line on stdout:
//!
//! ```text
//! CORE|APP|NETWORK|ADDRESS|COOKIE
//! ```
//!
//! The host dials `ADDRESS` only after [`Announcement::verify`] succeeds.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Version of the announcement and framing layer.
pub const CORE_PROTOCOL_VERSION: u32 = 1;

/// Version of the plugin service method set.
pub const APP_PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the magic cookie.
pub const MAGIC_COOKIE_KEY: &str = "WFLOW_PLUGIN_MAGIC_COOKIE";

/// Expected magic cookie value.
pub const MAGIC_COOKIE_VALUE: &str = "6c1b2f5e-wflow-external-plugin";

/// Environment variable carrying the application protocol version.
pub const PROTOCOL_VERSION_KEY: &str = "WFLOW_PLUGIN_PROTOCOL_VERSION";

/// Name of the single service a plugin dispenses on channel zero.
pub const PLUGIN_SERVICE_NAME: &str = "plugin";

/// Values both sides must agree on before a connection is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    core_version: u32,
    app_version: u32,
    cookie_key: String,
    cookie_value: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            core_version: CORE_PROTOCOL_VERSION,
            app_version: APP_PROTOCOL_VERSION,
            cookie_key: MAGIC_COOKIE_KEY.to_owned(),
            cookie_value: MAGIC_COOKIE_VALUE.to_owned(),
        }
    }
}

impl HandshakeConfig {
    /// Overrides the application protocol version.
    #[must_use]
    pub const fn with_app_version(mut self, version: u32) -> Self {
        self.app_version = version;
        self
    }

    /// Overrides the magic cookie value.
    #[must_use]
    pub fn with_cookie_value(mut self, value: impl Into<String>) -> Self {
        self.cookie_value = value.into();
        self
    }

    /// Core protocol version.
    #[must_use]
    pub const fn core_version(&self) -> u32 {
        self.core_version
    }

    /// Application protocol version.
    #[must_use]
    pub const fn app_version(&self) -> u32 {
        self.app_version
    }

    /// Environment key of the magic cookie.
    #[must_use]
    pub fn cookie_key(&self) -> &str {
        &self.cookie_key
    }

    /// Expected magic cookie value.
    #[must_use]
    pub fn cookie_value(&self) -> &str {
        &self.cookie_value
    }

    /// Environment variables the host passes to a plugin process.
    #[must_use]
    pub fn environment(&self) -> Vec<(String, String)> {
        vec![
            (self.cookie_key.clone(), self.cookie_value.clone()),
            (PROTOCOL_VERSION_KEY.to_owned(), self.app_version.to_string()),
        ]
    }
}

/// Transport a plugin listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    /// TCP socket, address is `host:port`.
    Tcp,
    /// Unix domain socket, address is a filesystem path.
    Unix,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Unix => "unix",
        })
    }
}

impl FromStr for Network {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "unix" => Ok(Self::Unix),
            other => Err(HandshakeError::UnsupportedNetwork {
                network: other.to_owned(),
            }),
        }
    }
}

/// Errors raised while parsing or verifying an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// The line does not have five `|`-separated fields.
    #[error("malformed handshake line: {line:?}")]
    Malformed {
        /// Raw line as received.
        line: String,
    },
    /// A version field is not a number.
    #[error("invalid {field} version in handshake: {value:?}")]
    InvalidVersion {
        /// Which version field failed.
        field: &'static str,
        /// Raw field contents.
        value: String,
    },
    /// The announced network is not supported.
    #[error("unsupported handshake network: {network}")]
    UnsupportedNetwork {
        /// Network name as announced.
        network: String,
    },
    /// Core or application version differs from the host's.
    #[error("{field} protocol version mismatch: host speaks {expected}, plugin announced {actual}")]
    VersionMismatch {
        /// Which version field differs.
        field: &'static str,
        /// Version the host speaks.
        expected: u32,
        /// Version the plugin announced.
        actual: u32,
    },
    /// The echoed magic cookie differs from the host's.
    #[error("magic cookie mismatch")]
    CookieMismatch,
}

/// Parsed handshake line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Core protocol version spoken by the plugin.
    pub core_version: u32,
    /// Application protocol version spoken by the plugin.
    pub app_version: u32,
    /// Transport the plugin listens on.
    pub network: Network,
    /// Address to dial.
    pub address: String,
    /// Cookie echoed back by the plugin.
    pub cookie: String,
}

impl Announcement {
    /// Builds the announcement a plugin prints for `config`.
    #[must_use]
    pub fn for_config(config: &HandshakeConfig, network: Network, address: impl Into<String>) -> Self {
        Self {
            core_version: config.core_version,
            app_version: config.app_version,
            network,
            address: address.into(),
            cookie: config.cookie_value.clone(),
        }
    }

    /// Parses one announcement line.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] describing the first malformed field.
    pub fn parse(line: &str) -> Result<Self, HandshakeError> {
        let trimmed = line.trim();
        let fields: Vec<&str> = trimmed.splitn(5, '|').collect();
        let [core, app, network, address, cookie] = fields.as_slice() else {
            return Err(HandshakeError::Malformed {
                line: trimmed.to_owned(),
            });
        };
        if address.is_empty() {
            return Err(HandshakeError::Malformed {
                line: trimmed.to_owned(),
            });
        }
        Ok(Self {
            core_version: parse_version("core", core)?,
            app_version: parse_version("application", app)?,
            network: network.parse()?,
            address: (*address).to_owned(),
            cookie: (*cookie).to_owned(),
        })
    }

    /// Renders the announcement as a single line without a trailing newline.
    #[must_use]
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.core_version, self.app_version, self.network, self.address, self.cookie
        )
    }

    /// Checks the announcement against the host's expectations.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::VersionMismatch`] or
    /// [`HandshakeError::CookieMismatch`].
    pub fn verify(&self, config: &HandshakeConfig) -> Result<(), HandshakeError> {
        if self.core_version != config.core_version {
            return Err(HandshakeError::VersionMismatch {
                field: "core",
                expected: config.core_version,
                actual: self.core_version,
            });
        }
        if self.app_version != config.app_version {
            return Err(HandshakeError::VersionMismatch {
                field: "application",
                expected: config.app_version,
                actual: self.app_version,
            });
        }
        if self.cookie != config.cookie_value {
            return Err(HandshakeError::CookieMismatch);
        }
        Ok(())
    }
}

fn parse_version(field: &'static str, value: &str) -> Result<u32, HandshakeError> {
    value
        .parse()
        .map_err(|_| HandshakeError::InvalidVersion {
            field,
            value: value.to_owned(),
        })
}
