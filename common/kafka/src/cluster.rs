//! Cluster definitions read from a kaf-style YAML file.
//!
//! The file lists named clusters with their brokers and optional TLS/SASL
//! settings, plus a `current-cluster` used when no name is given. A resolved
//! [`ClusterConfig`] knows how to render itself into an rdkafka `ClientConfig`.

use std::path::{Path, PathBuf};

use rdkafka::ClientConfig;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("cannot determine home directory for the default cluster config path")]
    NoHomeDir,
    #[error("failed to read cluster config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse cluster config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("no cluster name specified and no current-cluster defined")]
    NoCurrentCluster,
    #[error("cluster '{0}' not found in config")]
    UnknownCluster(String),
    #[error("cluster '{0}' has no brokers")]
    NoBrokers(String),
    #[error("unsupported SASL mechanism '{0}', expected PLAIN, SCRAM-SHA-256 or SCRAM-SHA-512")]
    UnsupportedMechanism(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterFile {
    #[serde(rename = "current-cluster", default)]
    pub current_cluster: String,
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterEntry {
    pub name: String,
    #[serde(default)]
    pub brokers: Vec<String>,
    #[serde(rename = "SASL", default)]
    pub sasl: Option<SaslEntry>,
    #[serde(rename = "TLS", default)]
    pub tls: Option<TlsConfig>,
    #[serde(rename = "security-protocol", default)]
    pub security_protocol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaslEntry {
    #[serde(default)]
    pub mechanism: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub cafile: Option<String>,
    #[serde(default)]
    pub clientfile: Option<String>,
    #[serde(default)]
    pub clientkeyfile: Option<String>,
    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    Plain,
    ScramSha256,
    ScramSha512,
}

impl SaslMechanism {
    pub fn parse(raw: &str) -> Result<Self, ClusterError> {
        match raw {
            // kaf treats an unset mechanism as PLAIN
            "" | "PLAIN" => Ok(SaslMechanism::Plain),
            "SCRAM-SHA-256" => Ok(SaslMechanism::ScramSha256),
            "SCRAM-SHA-512" => Ok(SaslMechanism::ScramSha512),
            other => Err(ClusterError::UnsupportedMechanism(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SaslConfig {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

// Keep the password out of logs
impl std::fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslConfig")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Fully resolved connection settings for one named cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub name: String,
    pub brokers: Vec<String>,
    pub tls: Option<TlsConfig>,
    pub sasl: Option<SaslConfig>,
}

impl ClusterFile {
    /// `$HOME/.kaf/config`
    pub fn default_path() -> Result<PathBuf, ClusterError> {
        dirs::home_dir()
            .map(|home| home.join(".kaf").join("config"))
            .ok_or(ClusterError::NoHomeDir)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ClusterError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path()?,
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| ClusterError::Read {
            path: path.clone(),
            source,
        })?;

        Self::from_yaml(&raw).map_err(|source| ClusterError::Parse { path, source })
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Resolve a cluster by name, falling back to `current-cluster` when the
    /// name is empty.
    pub fn resolve(&self, name: Option<&str>) -> Result<ClusterConfig, ClusterError> {
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None if self.current_cluster.is_empty() => return Err(ClusterError::NoCurrentCluster),
            None => self.current_cluster.as_str(),
        };

        let entry = self
            .clusters
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ClusterError::UnknownCluster(name.to_string()))?;

        if entry.brokers.is_empty() {
            return Err(ClusterError::NoBrokers(entry.name.clone()));
        }

        let sasl = match &entry.sasl {
            Some(sasl) if !sasl.username.is_empty() => Some(SaslConfig {
                mechanism: SaslMechanism::parse(&sasl.mechanism)?,
                username: sasl.username.clone(),
                password: sasl.password.clone(),
            }),
            _ => None,
        };

        // A bare `security-protocol: SSL` enables TLS without any file settings
        let tls = entry.tls.clone().or_else(|| {
            entry
                .security_protocol
                .to_ascii_uppercase()
                .ends_with("SSL")
                .then(TlsConfig::default)
        });

        Ok(ClusterConfig {
            name: entry.name.clone(),
            brokers: entry.brokers.clone(),
            tls,
            sasl,
        })
    }
}

impl ClusterConfig {
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn security_protocol(&self) -> &'static str {
        match (self.tls.is_some(), self.sasl.is_some()) {
            (false, false) => "plaintext",
            (true, false) => "ssl",
            (false, true) => "sasl_plaintext",
            (true, true) => "sasl_ssl",
        }
    }

    /// Base client settings shared by every consumer and producer talking to
    /// this cluster.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.bootstrap_servers())
            .set("security.protocol", self.security_protocol());

        if let Some(tls) = &self.tls {
            if let Some(ca) = &tls.cafile {
                config.set("ssl.ca.location", ca);
            }
            if let Some(cert) = &tls.clientfile {
                config.set("ssl.certificate.location", cert);
            }
            if let Some(key) = &tls.clientkeyfile {
                config.set("ssl.key.location", key);
            }
            if tls.insecure {
                config.set("enable.ssl.certificate.verification", "false");
            }
        }

        if let Some(sasl) = &self.sasl {
            config
                .set("sasl.mechanisms", sasl.mechanism.as_str())
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        config
    }
}
