// Metric names emitted by topic-relay. Per-message counters are labelled by
// topic and partition.

pub const MESSAGES_CONSUMED: &str = "topic_relay_messages_consumed_total";
pub const MESSAGES_PASSED: &str = "topic_relay_messages_passed_total";
pub const MESSAGES_FILTERED: &str = "topic_relay_messages_filtered_total";
pub const MESSAGES_PRINTED: &str = "topic_relay_messages_printed_total";
pub const MESSAGES_PUBLISHED: &str = "topic_relay_messages_published_total";
pub const CONSUME_ERRORS: &str = "topic_relay_consume_errors_total";

pub const OFFSET_COMMITS_REQUESTED: &str = "topic_relay_offset_commits_requested_total";
pub const OFFSET_COMMIT_OUT_OF_ORDER: &str = "topic_relay_offset_commit_out_of_order_total";
pub const OFFSET_COMMIT_FAILURES: &str = "topic_relay_offset_commit_failures_total";

/// Labelled by topic only
pub const PARTITIONS_SCHEDULED: &str = "topic_relay_partitions_scheduled_total";
pub const PARTITIONS_SKIPPED: &str = "topic_relay_partitions_skipped_total";
/// Labelled by exit reason
pub const WORKERS_FINISHED: &str = "topic_relay_workers_finished_total";
pub const ACTIVE_WORKERS: &str = "topic_relay_active_workers";
