use std::sync::Arc;

use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{Offset, TopicPartitionList};

use crate::model::TopicPartition;

/// The slice of the Kafka consumer client the worker needs during
/// bootstrap: pausing fetches before the state store is ready and
/// resuming them once it is. Kept as a trait so tests can substitute a
/// recording fake instead of a live `rdkafka` consumer.
pub trait ConsumerHandle: Send + Sync {
    fn pause(&self, tp: &TopicPartition) -> Result<(), KafkaError>;
    fn resume(&self, tp: &TopicPartition) -> Result<(), KafkaError>;
}

/// A `ConsumerHandle` backed by a real `rdkafka::consumer::StreamConsumer`,
/// mirroring the topic subscription pattern of
/// `common_kafka::kafka_consumer::SingleTopicConsumer`.
pub struct RdKafkaConsumerHandle {
    consumer: Arc<StreamConsumer>,
}

impl RdKafkaConsumerHandle {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self { consumer }
    }

    fn topic_partition_list(tp: &TopicPartition) -> TopicPartitionList {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(&tp.topic, tp.partition, Offset::Invalid)
            .expect("partition offset is always valid for pause/resume lists");
        list
    }
}

impl ConsumerHandle for RdKafkaConsumerHandle {
    fn pause(&self, tp: &TopicPartition) -> Result<(), KafkaError> {
        self.consumer.pause(&Self::topic_partition_list(tp))
    }

    fn resume(&self, tp: &TopicPartition) -> Result<(), KafkaError> {
        self.consumer.resume(&Self::topic_partition_list(tp))
    }
}
