use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgGroup, Parser};
use common_kafka::{ClusterFile, KafkaConfig};

use crate::config::{ConfigError, RunConfig, RunOptions};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Read every partition of a Kafka topic up to its current end, filter and rewrite \
             messages with a Lua script, then print and/or republish them",
    long_about = None
)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .multiple(true)
        .args(["print", "write"])
))]
pub struct Cli {
    /// kaf config file location [default: $HOME/.kaf/config]
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Lua script for filtering and rewriting messages
    #[arg(short = 'e', long = "script", conflicts_with = "script_file")]
    pub script: Option<String>,

    /// File holding the Lua script
    #[arg(short = 'f', long = "script-file")]
    pub script_file: Option<PathBuf>,

    /// Source cluster name [default: current cluster]
    #[arg(short = 's', long = "source")]
    pub source: Option<String>,

    /// Destination cluster name [default: source cluster]
    #[arg(short = 'd', long = "destination")]
    pub destination: Option<String>,

    /// Source topic
    #[arg(short = 't', long = "topic")]
    pub topic: String,

    /// Consumer group to resume from and commit to
    #[arg(short = 'g', long = "group")]
    pub group: Option<String>,

    /// Publish accepted messages to the destination cluster
    #[arg(short = 'w', long = "write")]
    pub write: bool,

    /// Print accepted messages to stdout
    #[arg(short = 'p', long = "print")]
    pub print: bool,

    /// Hand message values to the script as raw strings instead of parsed JSON
    #[arg(short = 'r', long = "raw")]
    pub raw: bool,

    /// Publish every message to this topic, whatever the script set
    #[arg(long)]
    pub destination_topic: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "TOPIC_RELAY_METRICS_BIND")]
    pub metrics_bind: Option<SocketAddr>,
}

impl Cli {
    /// Read the script and cluster file and resolve the run.
    pub fn into_run_config(self, kafka: KafkaConfig) -> Result<RunConfig, ConfigError> {
        let script = match (self.script, &self.script_file) {
            (Some(script), _) => Some(script),
            (None, Some(path)) => Some(std::fs::read_to_string(path).map_err(|source| {
                ConfigError::ReadScript {
                    path: path.clone(),
                    source,
                }
            })?),
            (None, None) => None,
        };

        let clusters = ClusterFile::load(self.config.as_deref())?;
        let options = RunOptions {
            source_cluster: self.source,
            destination_cluster: self.destination,
            topic: self.topic,
            group: self.group,
            script,
            raw: self.raw,
            print: self.print,
            publish: self.write,
            destination_topic: self.destination_topic,
            metrics_bind: self.metrics_bind,
        };

        RunConfig::resolve(options, &clusters, kafka)
    }
}
