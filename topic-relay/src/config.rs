use std::net::SocketAddr;
use std::path::PathBuf;

use common_kafka::{ClusterConfig, ClusterError, ClusterFile, KafkaConfig};
use thiserror::Error;

use crate::filter::FilterMode;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),
    #[error("failed to read script file {path}: {source}")]
    ReadScript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("topic name must not be empty")]
    EmptyTopic,
}

/// Everything a run needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_cluster: ClusterConfig,
    /// Present exactly when publishing
    pub destination_cluster: Option<ClusterConfig>,
    pub topic: String,
    /// Consumer group whose offsets are resumed from and committed to
    pub group: Option<String>,
    pub script: Option<String>,
    pub mode: FilterMode,
    pub print: bool,
    pub destination_topic: Option<String>,
    pub metrics_bind: Option<SocketAddr>,
    pub kafka: KafkaConfig,
}

/// The user-facing choices a [`RunConfig`] is resolved from.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub source_cluster: Option<String>,
    pub destination_cluster: Option<String>,
    pub topic: String,
    pub group: Option<String>,
    pub script: Option<String>,
    pub raw: bool,
    pub print: bool,
    pub publish: bool,
    pub destination_topic: Option<String>,
    pub metrics_bind: Option<SocketAddr>,
}

impl RunConfig {
    pub fn resolve(
        options: RunOptions,
        clusters: &ClusterFile,
        kafka: KafkaConfig,
    ) -> Result<Self, ConfigError> {
        if options.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }

        let source_cluster = clusters.resolve(non_empty(options.source_cluster.as_deref()))?;

        // Without an explicit destination, publish back to where we read from
        let destination_cluster = if options.publish {
            match non_empty(options.destination_cluster.as_deref()) {
                Some(name) if name != source_cluster.name => Some(clusters.resolve(Some(name))?),
                _ => Some(source_cluster.clone()),
            }
        } else {
            None
        };

        Ok(Self {
            source_cluster,
            destination_cluster,
            topic: options.topic,
            group: options.group.filter(|g| !g.is_empty()),
            script: options.script.filter(|s| !s.trim().is_empty()),
            mode: FilterMode {
                raw: options.raw,
                publish: options.publish,
            },
            print: options.print,
            destination_topic: options.destination_topic.filter(|t| !t.is_empty()),
            metrics_bind: options.metrics_bind,
            kafka,
        })
    }
}

fn non_empty(name: Option<&str>) -> Option<&str> {
    name.filter(|n| !n.is_empty())
}
