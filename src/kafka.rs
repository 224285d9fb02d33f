use std::sync::Arc;
use std::time::Duration;

use bytestring::ByteString;
use rdkafka::client::ClientContext;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::error::KafkaError;
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer as _, ProducerContext};
use rdkafka::types::RDKafkaErrorCode;

use crate::config::ProducerConfig;
use crate::queue::{DeliveryOutcome, DeliveryQueue, DeliveryToken};
use crate::transport::Transport;
use crate::{EgressError, Result};

/// Producer session backed by the librdkafka client.
pub type KafkaProducer = crate::session::Producer<KafkaTransport>;

/// The per-message opaque librdkafka echoes back at delivery time. Zero
/// means "no completion callback", like the NULL `_private` convention of
/// the C client, so tokenless confirmations are never enqueued.
#[inline]
fn encode_opaque(token: Option<DeliveryToken>) -> usize {
    token.map(|t| t.into_raw() as usize + 1).unwrap_or(0)
}

#[inline]
fn decode_opaque(opaque: usize) -> Option<DeliveryToken> {
    (opaque != 0).then(|| DeliveryToken::from_raw(opaque as u64 - 1))
}

/// Client context bridging librdkafka's delivery-report callback onto the
/// session's delivery queue.
struct DeliveryBridge {
    deliveries: Arc<DeliveryQueue>,
}

impl ClientContext for DeliveryBridge {}

impl ProducerContext for DeliveryBridge {
    type DeliveryOpaque = usize;

    // Runs on whichever thread drives poll/flush, never the caller task.
    fn delivery(&self, result: &DeliveryResult<'_>, opaque: usize) {
        let Some(token) = decode_opaque(opaque) else {
            return;
        };
        match result {
            Ok(_) => self.deliveries.push(DeliveryOutcome::ok(Some(token))),
            Err((e, _)) => self.deliveries.push(DeliveryOutcome::failed(Some(token), e.to_string())),
        }
    }
}

/// `Transport` over `rdkafka::producer::BaseProducer`. librdkafka interns
/// `rd_kafka_topic_t` objects by name inside the producer and releases them
/// with it, so the topic handle at this level is the interned name.
pub struct KafkaTransport {
    producer: BaseProducer<DeliveryBridge>,
}

impl Transport for KafkaTransport {
    type Topic = ByteString;

    fn connect(cfg: &ProducerConfig, deliveries: Arc<DeliveryQueue>) -> Result<Self> {
        let mut client_cfg = ClientConfig::new();
        client_cfg.set("bootstrap.servers", cfg.brokers.as_str());
        if let Some(client_id) = &cfg.client_id {
            log::info!("client.id: {client_id}");
            client_cfg.set("client.id", client_id.as_str());
        }
        for (key, val) in &cfg.options {
            if !key.trim_start().starts_with('#') {
                log::info!("{key}={val}");
                client_cfg.set(key, val);
            }
        }
        client_cfg.set_log_level(RDKafkaLogLevel::Info);

        let producer: BaseProducer<DeliveryBridge> = client_cfg
            .create_with_context(DeliveryBridge { deliveries })
            .map_err(|e| EgressError::Configuration(e.to_string()))?;
        Ok(KafkaTransport { producer })
    }

    fn create_topic(&self, name: &str) -> Result<Self::Topic> {
        Ok(ByteString::from(name))
    }

    fn submit(
        &self,
        topic: &Self::Topic,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        token: Option<DeliveryToken>,
    ) -> Result<()> {
        // RD_KAFKA_MSG_F_COPY semantics: the client copies key and payload.
        let mut record: BaseRecord<'_, [u8], [u8], usize> =
            BaseRecord::with_opaque_to(topic.as_ref(), encode_opaque(token));
        if let Some(key) = key {
            record = record.key(key);
        }
        if let Some(value) = value {
            record = record.payload(value);
        }
        self.producer.send(record).map_err(|(e, _)| EgressError::Produce(e.to_string()))
    }

    fn poll(&self, timeout: Duration) {
        self.producer.poll(timeout);
    }

    fn flush(&self, timeout: Duration) -> bool {
        match self.producer.flush(timeout) {
            Ok(()) => false,
            Err(KafkaError::Flush(RDKafkaErrorCode::OperationTimedOut)) => true,
            Err(e) => {
                log::warn!("flush failed: {e}");
                false
            }
        }
    }
}
