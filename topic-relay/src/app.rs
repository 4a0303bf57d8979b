use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RunConfig;
use crate::filter::FilterScript;
use crate::kafka::{KafkaOffsetStore, KafkaPublisher, KafkaTopicSource};
use crate::output::Printer;
use crate::partition_worker::Delivery;
use crate::publisher::Publisher;
use crate::topic_processor::{RunSummary, TopicProcessor};

/// Connect everything described by `config` and process the topic once.
pub async fn run(config: &RunConfig, cancel: CancellationToken) -> Result<RunSummary> {
    if let Some(addr) = config.metrics_bind {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("failed to start metrics exporter on {addr}"))?;
        info!(%addr, "Serving metrics");
    }

    // A broken script should fail before any connection is made
    let filter = config
        .script
        .as_deref()
        .map(|script| FilterScript::compile(script, config.mode))
        .transpose()
        .context("invalid filter script")?;

    let source = KafkaTopicSource::new(&config.source_cluster, &config.kafka).with_context(|| {
        format!(
            "failed to connect to source cluster '{}'",
            config.source_cluster.name
        )
    })?;

    let publisher = match &config.destination_cluster {
        Some(cluster) => {
            let publisher = KafkaPublisher::new(cluster, &config.kafka).with_context(|| {
                format!("failed to connect to destination cluster '{}'", cluster.name)
            })?;
            let publisher: Arc<dyn Publisher> = Arc::new(publisher);
            Some(publisher)
        }
        None => None,
    };

    let delivery = Arc::new(Delivery {
        printer: config.print.then(Printer::stdout),
        publisher,
        destination_topic: config.destination_topic.clone(),
    });

    let mut processor = TopicProcessor::new(
        config.topic.clone(),
        config.mode.raw,
        Arc::new(source),
        delivery,
    );
    if let Some(filter) = filter {
        processor = processor.with_filter(filter);
    }
    if let Some(group) = &config.group {
        let offsets = KafkaOffsetStore::new(&config.source_cluster, &config.kafka, group)
            .with_context(|| format!("failed to set up offsets for group '{group}'"))?;
        processor = processor.with_offsets(Arc::new(offsets));
    }

    let summary = processor
        .run(cancel)
        .await
        .with_context(|| format!("failed to process topic '{}'", config.topic))?;

    info!(
        topic = %config.topic,
        partitions = summary.partitions.len(),
        skipped = summary.skipped.len(),
        consumed = summary.consumed(),
        delivered = summary.delivered(),
        "Topic processed"
    );
    Ok(summary)
}

/// Cancel `token` on SIGINT or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = token.cancelled() => return,
        }
        token.cancel();
    });
    Ok(())
}
