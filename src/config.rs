use envconfig::Envconfig;

/// Broker-facing configuration, mirroring `common_kafka::config::KafkaConfig`
/// from the teams' shared Kafka crate.
#[derive(Envconfig, Clone, Debug)]
pub struct KafkaConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32,

    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,

    #[envconfig(default = "none")]
    pub kafka_compression_codec: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}

/// Worker-facing configuration: batch sizing, interjection defaults, and
/// the replication knobs used by the topic naming/normalization rules
/// below.
#[derive(Envconfig, Clone, Debug)]
pub struct WorkerConfig {
    pub kafka_consumer_group: String,
    pub kafka_consumer_topic: String,

    /// User-supplied change-log topic override; empty means derive one
    /// via `change_log_topic_name`.
    #[envconfig(default = "")]
    pub change_log_topic: String,

    #[envconfig(default = "500")]
    pub max_batch_size: usize,

    #[envconfig(default = "16")]
    pub max_pending_items: usize,

    #[envconfig(default = "1")]
    pub replication_factor: i32,

    /// Public for migration purposes; intentionally not acted on by the
    /// worker. See `CommitOffsets` in DESIGN.md.
    #[envconfig(default = "false")]
    pub commit_offsets: bool,
}

/// Commit-log and change-log topic names plus the clamped replication
/// settings the runtime should use when creating them, derived from a
/// `WorkerConfig`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KafkaTopics {
    pub commit_log_topic: String,
    pub change_log_topic: String,
    pub replication_factor: i32,
    pub min_in_sync_replicas: i32,
}

impl KafkaTopics {
    pub fn derive(config: &WorkerConfig) -> Self {
        let commit_log_topic = commit_log_topic_name(&config.kafka_consumer_group);
        let change_log_topic = change_log_topic_name(
            &config.change_log_topic,
            &config.kafka_consumer_topic,
            &config.kafka_consumer_group,
        );
        let replication_factor = normalize_replication_factor(config.replication_factor);
        let min_in_sync_replicas = normalize_min_in_sync(replication_factor, replication_factor);

        Self {
            commit_log_topic,
            change_log_topic,
            replication_factor,
            min_in_sync_replicas,
        }
    }
}

/// `gkes_commit_log_{groupId}` — unconditional.
pub fn commit_log_topic_name(group_id: &str) -> String {
    format!("gkes_commit_log_{group_id}")
}

/// User-supplied change-log topic if non-empty, else
/// `gkes_change_log_{topic}_{groupId}`.
pub fn change_log_topic_name(override_name: &str, topic: &str, group_id: &str) -> String {
    if override_name.is_empty() {
        format!("gkes_change_log_{topic}_{group_id}")
    } else {
        override_name.to_string()
    }
}

/// Replication factor `<= 0` clamps to `1`.
pub fn normalize_replication_factor(replication_factor: i32) -> i32 {
    if replication_factor <= 0 {
        1
    } else {
        replication_factor
    }
}

/// `min.insync.replicas`: if the requested value is `>=` replication
/// factor, clamp to `replicationFactor - 1`; if replication factor is
/// `<= 1`, clamp to `1`.
pub fn normalize_min_in_sync(requested: i32, replication_factor: i32) -> i32 {
    if replication_factor <= 1 {
        return 1;
    }
    if requested >= replication_factor {
        replication_factor - 1
    } else {
        requested
    }
}

/// `max(MaxBatchSize/10, 100)`, the `eventInput` channel capacity.
pub fn event_input_capacity(max_batch_size: usize) -> usize {
    (max_batch_size / 10).max(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_log_name_is_derived() {
        assert_eq!(commit_log_topic_name("my-group"), "gkes_commit_log_my-group");
    }

    #[test]
    fn change_log_name_falls_back_when_unset() {
        assert_eq!(
            change_log_topic_name("", "orders", "my-group"),
            "gkes_change_log_orders_my-group"
        );
    }

    #[test]
    fn change_log_name_honours_override() {
        assert_eq!(
            change_log_topic_name("custom-topic", "orders", "my-group"),
            "custom-topic"
        );
    }

    #[test]
    fn replication_factor_clamps_non_positive() {
        assert_eq!(normalize_replication_factor(0), 1);
        assert_eq!(normalize_replication_factor(-3), 1);
        assert_eq!(normalize_replication_factor(3), 3);
    }

    #[test]
    fn min_in_sync_clamps_to_one_when_rf_is_one() {
        assert_eq!(normalize_min_in_sync(5, 1), 1);
        assert_eq!(normalize_min_in_sync(0, 1), 1);
    }

    #[test]
    fn min_in_sync_clamps_to_rf_minus_one_when_too_high() {
        assert_eq!(normalize_min_in_sync(3, 3), 2);
        assert_eq!(normalize_min_in_sync(5, 3), 2);
    }

    #[test]
    fn min_in_sync_keeps_requested_value_when_valid() {
        assert_eq!(normalize_min_in_sync(2, 3), 2);
    }

    #[test]
    fn event_input_capacity_has_a_floor() {
        assert_eq!(event_input_capacity(100), 100);
        assert_eq!(event_input_capacity(2000), 200);
    }
}
