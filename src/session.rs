use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use bytestring::ByteString;

use crate::config::ProducerConfig;
use crate::offload;
use crate::queue::{DeliveryQueue, DeliveryToken};
use crate::topics::TopicCache;
use crate::transport::Transport;
use crate::{EgressError, HashMap, Result};

/// Per-message completion callback. Invoked with `None` on successful
/// delivery, or the broker's error description on failure. Consumed exactly
/// once; a returned error stops the surrounding drain early.
pub type DeliveryCallback = Box<dyn FnOnce(Option<&str>) -> anyhow::Result<()> + Send + 'static>;

/// Outgoing message. At least one of key and value must be present.
pub struct Message {
    pub topic: ByteString,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    pub on_delivery: Option<DeliveryCallback>,
}

impl Message {
    pub fn new<T: Into<ByteString>>(topic: T) -> Self {
        Self { topic: topic.into(), key: None, value: None, on_delivery: None }
    }

    pub fn key<K: Into<Bytes>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value<V: Into<Bytes>>(mut self, value: V) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn on_delivery<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Option<&str>) -> anyhow::Result<()> + Send + 'static,
    {
        self.on_delivery = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("value", &self.value)
            .field("on_delivery", &self.on_delivery.is_some())
            .finish()
    }
}

/// Caller-side callback table: integer token → completion callback. The
/// session stores and forwards only the token; callback ownership never
/// leaves this registry until consumption. Caller-thread-only.
#[derive(Default)]
struct CallbackRegistry {
    next_id: u64,
    callbacks: HashMap<u64, DeliveryCallback>,
}

impl CallbackRegistry {
    fn register(&mut self, cb: DeliveryCallback) -> Result<DeliveryToken> {
        self.callbacks.try_reserve(1).map_err(|_| EgressError::OutOfMemory)?;
        let id = self.next_id;
        self.next_id += 1;
        self.callbacks.insert(id, cb);
        Ok(DeliveryToken::from_raw(id))
    }

    fn take(&mut self, token: DeliveryToken) -> Option<DeliveryCallback> {
        self.callbacks.remove(&token.into_raw())
    }

    #[inline]
    fn unregister(&mut self, token: DeliveryToken) {
        self.callbacks.remove(&token.into_raw());
    }

    #[inline]
    fn len(&self) -> usize {
        self.callbacks.len()
    }

    fn clear(&mut self) -> usize {
        let dropped = self.callbacks.len();
        self.callbacks.clear();
        dropped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closing,
    Closed,
}

/// Producer session: one broker-client handle, one topic cache, one
/// delivery queue, one callback registry.
///
/// Designed for a single cooperative caller task: `produce` and
/// `drain_deliveries` are synchronous and bounded, `poll_once` and `close`
/// suspend the task for exactly one offloaded client call. The delivery
/// queue is the only state shared with the client's callback thread.
pub struct Producer<T: Transport> {
    transport: Arc<T>,
    topics: TopicCache<T::Topic>,
    deliveries: Arc<DeliveryQueue>,
    callbacks: CallbackRegistry,
    cfg: ProducerConfig,
    state: State,
}

impl<T: Transport> Producer<T> {
    /// Opens a producer session. Fails with `NoBrokers` when the broker
    /// address string is empty, and with `Configuration` when the client
    /// rejects an option.
    pub fn connect(cfg: ProducerConfig) -> Result<Self> {
        if cfg.brokers.trim().is_empty() {
            return Err(EgressError::NoBrokers);
        }
        let deliveries = Arc::new(DeliveryQueue::new());
        let transport = Arc::new(T::connect(&cfg, deliveries.clone())?);
        log::info!("producer session open, brokers: {}", cfg.brokers);
        Ok(Self {
            transport,
            topics: TopicCache::new(),
            deliveries,
            callbacks: CallbackRegistry::default(),
            cfg,
            state: State::Open,
        })
    }

    #[inline]
    fn ensure_open(&self) -> Result<()> {
        if self.state == State::Open {
            Ok(())
        } else {
            Err(EgressError::Closed)
        }
    }

    /// Hands one message to the broker client. Never suspends.
    ///
    /// The topic handle is resolved through the cache, created lazily on
    /// first use. When a completion callback is supplied it is registered
    /// and its token attached to the message; on submission failure the
    /// token is unregistered again, so a failed produce leaks nothing.
    pub fn produce(&mut self, msg: Message) -> Result<()> {
        self.ensure_open()?;
        if msg.topic.is_empty() {
            return Err(EgressError::InvalidMessage("message must contain a non-empty 'topic'"));
        }
        if msg.key.is_none() && msg.value.is_none() {
            return Err(EgressError::InvalidMessage("message must contain a non-nil key or value"));
        }

        let transport = &self.transport;
        let topic = self.topics.resolve_with(&msg.topic, || transport.create_topic(&msg.topic))?;

        let token = match msg.on_delivery {
            Some(cb) => Some(self.callbacks.register(cb)?),
            None => None,
        };

        if let Err(e) = self.transport.submit(&topic, msg.key.as_deref(), msg.value.as_deref(), token) {
            if let Some(token) = token {
                self.callbacks.unregister(token);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Offloads one bounded poll call so the client can service its event
    /// and delivery-callback processing. Call this in a loop as part of
    /// normal operation; confirmations it produces land on the delivery
    /// queue for the next `drain_deliveries`.
    pub async fn poll_once(&self) -> Result<()> {
        self.ensure_open()?;
        let transport = self.transport.clone();
        let timeout = self.cfg.poll_timeout;
        offload::run(move || transport.poll(timeout)).await
    }

    /// Pops up to `limit` delivery outcomes and invokes the matching
    /// completion callbacks, each exactly once. Never suspends.
    ///
    /// Outcomes arrive in callback-arrival order, which is delivery
    /// completion order, not submission order. Each outcome is popped under
    /// a short-held lock and its callback runs outside the lock, so the
    /// callback thread is never starved by an expensive callback. A failing
    /// callback stops the drain early with `Callback`; whatever is still
    /// queued is picked up by the next call.
    pub fn drain_deliveries(&mut self, limit: usize) -> (usize, Option<EgressError>) {
        if self.state == State::Closed {
            return (0, Some(EgressError::Closed));
        }
        let mut processed = 0;
        while processed < limit {
            let Some(outcome) = self.deliveries.pop_one() else {
                break;
            };
            processed += 1;
            let Some(token) = outcome.token else {
                continue;
            };
            let Some(cb) = self.callbacks.take(token) else {
                log::warn!("delivery outcome for unknown token {}", token.into_raw());
                continue;
            };
            if let Err(e) = cb(outcome.error.as_deref()) {
                return (processed, Some(EgressError::Callback(e.to_string())));
            }
        }
        (processed, None)
    }

    /// Closes the session: offloads a flush loop until the client reports
    /// no deliveries in flight, drains the queue to empty so outstanding
    /// callbacks still run, then releases the topic cache. Idempotent;
    /// closing a closed session is a no-op returning success. Callback
    /// errors during this final drain are logged, not returned, so close
    /// always completes.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == State::Closed {
            return Ok(());
        }
        self.state = State::Closing;

        let transport = self.transport.clone();
        let step = self.cfg.flush_timeout;
        offload::run(move || while transport.flush(step) {}).await?;

        // Deliveries may land between the flush and the queue teardown;
        // drain to empty so no registered callback is dropped silently.
        let mut drained = 0usize;
        while let Some(outcome) = self.deliveries.pop_one() {
            drained += 1;
            if let Some(cb) = outcome.token.and_then(|t| self.callbacks.take(t)) {
                if let Err(e) = cb(outcome.error.as_deref()) {
                    log::warn!("delivery callback failed during close: {e}");
                }
            }
        }

        let released = self.topics.destroy_all();
        let abandoned = self.callbacks.clear();
        if abandoned > 0 {
            log::warn!("closed with {abandoned} delivery callbacks never confirmed");
        }
        self.state = State::Closed;
        log::debug!("producer session closed, topics released: {released}, drained on close: {drained}");
        Ok(())
    }

    /// Outcomes waiting to be drained.
    #[inline]
    pub fn pending_deliveries(&self) -> usize {
        self.deliveries.len()
    }

    /// Completion callbacks registered and not yet confirmed.
    #[inline]
    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    /// Live topic handles in the cache.
    #[inline]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Total topic handles created over the session's lifetime.
    #[inline]
    pub fn topics_created(&self) -> usize {
        self.topics.created()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }
}

impl<T: Transport> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("state", &self.state)
            .field("brokers", &self.cfg.brokers)
            .field("topics", &self.topics.len())
            .field("pending_deliveries", &self.deliveries.len())
            .field("pending_callbacks", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::anyhow;
    use bytestring::ByteString;
    use parking_lot::Mutex;

    use super::{Message, Producer};
    use crate::config::ProducerConfig;
    use crate::queue::{DeliveryOutcome, DeliveryQueue, DeliveryToken};
    use crate::transport::Transport;
    use crate::{EgressError, Result};

    struct MockTopic {
        name: ByteString,
    }

    struct PendingSend {
        topic: ByteString,
        key: Option<Vec<u8>>,
        value: Option<Vec<u8>>,
        token: Option<DeliveryToken>,
    }

    /// In-memory broker client: submissions sit in `pending` until `poll`
    /// or `flush` "completes" them by pushing outcomes onto the delivery
    /// queue, mirroring a client that fires confirmation callbacks while
    /// being polled.
    struct MockTransport {
        deliveries: Arc<DeliveryQueue>,
        pending: Mutex<Vec<PendingSend>>,
        created_topics: AtomicUsize,
        fail_submit: AtomicBool,
        fail_topics: AtomicBool,
        fail_delivery: AtomicBool,
    }

    impl MockTransport {
        fn complete_pending(&self) {
            let failed = self.fail_delivery.load(Ordering::SeqCst);
            for send in self.pending.lock().drain(..) {
                if send.token.is_some() {
                    let outcome = if failed {
                        DeliveryOutcome::failed(send.token, "broker: message timed out")
                    } else {
                        DeliveryOutcome::ok(send.token)
                    };
                    self.deliveries.push(outcome);
                }
            }
        }
    }

    impl Transport for MockTransport {
        type Topic = Arc<MockTopic>;

        fn connect(cfg: &ProducerConfig, deliveries: Arc<DeliveryQueue>) -> Result<Self> {
            for key in cfg.options.keys() {
                if key.starts_with("bad.") {
                    return Err(EgressError::Configuration(format!("no such configuration property: {key}")));
                }
            }
            Ok(Self {
                deliveries,
                pending: Mutex::new(Vec::new()),
                created_topics: AtomicUsize::new(0),
                fail_submit: AtomicBool::new(false),
                fail_topics: AtomicBool::new(false),
                fail_delivery: AtomicBool::new(false),
            })
        }

        fn create_topic(&self, name: &str) -> Result<Self::Topic> {
            if self.fail_topics.load(Ordering::SeqCst) {
                return Err(EgressError::TopicCreation("broker unavailable".into()));
            }
            self.created_topics.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockTopic { name: ByteString::from(name) }))
        }

        fn submit(
            &self,
            topic: &Self::Topic,
            key: Option<&[u8]>,
            value: Option<&[u8]>,
            token: Option<DeliveryToken>,
        ) -> Result<()> {
            if self.fail_submit.load(Ordering::SeqCst) {
                return Err(EgressError::Produce("local: queue full".into()));
            }
            self.pending.lock().push(PendingSend {
                topic: topic.name.clone(),
                key: key.map(<[u8]>::to_vec),
                value: value.map(<[u8]>::to_vec),
                token,
            });
            Ok(())
        }

        fn poll(&self, _timeout: Duration) {
            self.complete_pending();
        }

        fn flush(&self, _timeout: Duration) -> bool {
            self.complete_pending();
            false
        }
    }

    type MockProducer = Producer<MockTransport>;

    fn open() -> MockProducer {
        MockProducer::connect(ProducerConfig::new("localhost:9092")).unwrap()
    }

    /// Shared recorder for delivery callback invocations.
    fn recorder() -> (Arc<Mutex<Vec<Option<String>>>>, impl Fn() -> crate::session::DeliveryCallback) {
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let seen = seen.clone();
            move || {
                let seen = seen.clone();
                Box::new(move |err: Option<&str>| {
                    seen.lock().push(err.map(String::from));
                    Ok(())
                }) as crate::session::DeliveryCallback
            }
        };
        (seen, make)
    }

    #[test]
    fn empty_brokers_rejected() {
        assert!(matches!(MockProducer::connect(ProducerConfig::new("")), Err(EgressError::NoBrokers)));
        assert!(matches!(MockProducer::connect(ProducerConfig::new("   ")), Err(EgressError::NoBrokers)));
    }

    #[test]
    fn bad_option_surfaces_client_message() {
        let cfg = ProducerConfig::new("localhost:9092").option("bad.option", "1");
        let err = MockProducer::connect(cfg).unwrap_err();
        assert!(matches!(err, EgressError::Configuration(_)));
        assert!(err.to_string().contains("bad.option"));
    }

    #[test]
    fn produce_without_callback_registers_no_token() {
        let mut p = open();
        p.produce(Message::new("t").value("v")).unwrap();
        assert_eq!(p.pending_callbacks(), 0);
        let pending = p.transport.pending.lock();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].topic, "t");
        assert!(pending[0].key.is_none());
        assert_eq!(pending[0].value.as_deref(), Some(b"v".as_ref()));
        assert!(pending[0].token.is_none());
    }

    #[test]
    fn message_without_key_and_value_rejected() {
        let mut p = open();
        let err = p.produce(Message::new("t")).unwrap_err();
        assert!(matches!(err, EgressError::InvalidMessage(_)));
        // no topic handle was created as a side effect
        assert_eq!(p.topics_created(), 0);
        assert_eq!(p.transport.created_topics.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn message_without_topic_rejected() {
        let mut p = open();
        let err = p.produce(Message::new("").value("v")).unwrap_err();
        assert!(matches!(err, EgressError::InvalidMessage(_)));
    }

    #[test]
    fn key_only_message_is_valid() {
        let mut p = open();
        p.produce(Message::new("t").key("k")).unwrap();
        assert_eq!(p.transport.pending.lock()[0].key.as_deref(), Some(b"k".as_ref()));
    }

    #[tokio::test]
    async fn delivery_callback_invoked_exactly_once() {
        let mut p = open();
        let (seen, cb) = recorder();
        p.produce(Message::new("t").value("v").on_delivery(cb())).unwrap();
        assert_eq!(p.pending_callbacks(), 1);

        p.poll_once().await.unwrap();
        let (count, err) = p.drain_deliveries(16);
        assert_eq!(count, 1);
        assert!(err.is_none());
        assert_eq!(seen.lock().as_slice(), &[None]);
        assert_eq!(p.pending_callbacks(), 0);

        // nothing left for a second drain
        let (count, err) = p.drain_deliveries(16);
        assert_eq!(count, 0);
        assert!(err.is_none());
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn failed_delivery_passes_error_to_callback() {
        let mut p = open();
        let (seen, cb) = recorder();
        p.transport.fail_delivery.store(true, Ordering::SeqCst);
        p.produce(Message::new("t").value("v").on_delivery(cb())).unwrap();
        p.poll_once().await.unwrap();

        let (count, err) = p.drain_deliveries(16);
        assert_eq!(count, 1);
        assert!(err.is_none());
        assert_eq!(seen.lock().as_slice(), &[Some("broker: message timed out".to_string())]);
    }

    #[test]
    fn submit_failure_unregisters_token() {
        let mut p = open();
        p.transport.fail_submit.store(true, Ordering::SeqCst);
        let err = p.produce(Message::new("t").value("v").on_delivery(|_| Ok(()))).unwrap_err();
        assert!(matches!(err, EgressError::Produce(_)));
        assert!(err.is_retryable());
        assert_eq!(p.pending_callbacks(), 0);

        // the same message can be retried once the client recovers
        p.transport.fail_submit.store(false, Ordering::SeqCst);
        p.produce(Message::new("t").value("v").on_delivery(|_| Ok(()))).unwrap();
        assert_eq!(p.pending_callbacks(), 1);
    }

    #[test]
    fn topic_creation_failure_leaves_cache_unchanged() {
        let mut p = open();
        p.transport.fail_topics.store(true, Ordering::SeqCst);
        let err = p.produce(Message::new("t").value("v")).unwrap_err();
        assert!(matches!(err, EgressError::TopicCreation(_)));
        assert_eq!(p.topic_count(), 0);

        p.transport.fail_topics.store(false, Ordering::SeqCst);
        p.produce(Message::new("t").value("v")).unwrap();
        assert_eq!(p.topic_count(), 1);
    }

    #[tokio::test]
    async fn drain_preserves_arrival_order() {
        let mut p = open();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let order = order.clone();
            p.produce(Message::new("t").value(tag).on_delivery(move |_| {
                order.lock().push(tag);
                Ok(())
            }))
            .unwrap();
        }
        p.poll_once().await.unwrap();
        let (count, err) = p.drain_deliveries(16);
        assert_eq!(count, 3);
        assert!(err.is_none());
        assert_eq!(order.lock().as_slice(), &["a", "b", "c"]);
    }

    #[tokio::test]
    async fn drain_limit_respected() {
        let mut p = open();
        let (seen, cb) = recorder();
        for _ in 0..3 {
            p.produce(Message::new("t").value("v").on_delivery(cb())).unwrap();
        }
        p.poll_once().await.unwrap();
        assert_eq!(p.pending_deliveries(), 3);

        let (count, err) = p.drain_deliveries(1);
        assert_eq!((count, err.is_none()), (1, true));
        assert_eq!(p.pending_deliveries(), 2);
        assert_eq!(seen.lock().len(), 1);

        let (count, err) = p.drain_deliveries(16);
        assert_eq!((count, err.is_none()), (2, true));
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn callback_error_stops_drain_early() {
        let mut p = open();
        let ran: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "boom", "third"] {
            let ran = ran.clone();
            p.produce(Message::new("t").value(tag).on_delivery(move |_| {
                ran.lock().push(tag);
                if tag == "boom" {
                    Err(anyhow!("callback exploded"))
                } else {
                    Ok(())
                }
            }))
            .unwrap();
        }
        p.poll_once().await.unwrap();

        let (count, err) = p.drain_deliveries(16);
        assert_eq!(count, 2);
        assert!(matches!(err, Some(EgressError::Callback(_))));
        assert_eq!(p.pending_deliveries(), 1);
        assert_eq!(ran.lock().as_slice(), &["first", "boom"]);

        // the remaining outcome is picked up by the next drain
        let (count, err) = p.drain_deliveries(16);
        assert_eq!(count, 1);
        assert!(err.is_none());
        assert_eq!(ran.lock().as_slice(), &["first", "boom", "third"]);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut p = open();
        p.produce(Message::new("t").value("v")).unwrap();
        p.close().await.unwrap();
        assert!(p.is_closed());
        assert_eq!(p.topic_count(), 0);

        p.close().await.unwrap();
        assert!(p.is_closed());

        assert!(matches!(p.produce(Message::new("t").value("v")), Err(EgressError::Closed)));
        assert!(matches!(p.poll_once().await, Err(EgressError::Closed)));
        let (count, err) = p.drain_deliveries(16);
        assert_eq!(count, 0);
        assert!(matches!(err, Some(EgressError::Closed)));
    }

    #[tokio::test]
    async fn close_drains_outstanding_deliveries() {
        let mut p = open();
        let (seen, cb) = recorder();
        for _ in 0..4 {
            p.produce(Message::new("t").value("v").on_delivery(cb())).unwrap();
        }
        // never polled; the flush inside close settles the in-flight sends
        p.close().await.unwrap();
        assert_eq!(seen.lock().as_slice(), &[None, None, None, None]);
        assert_eq!(p.pending_deliveries(), 0);
        assert_eq!(p.pending_callbacks(), 0);
    }

    #[tokio::test]
    async fn two_topics_many_messages_create_two_handles() {
        let mut p = open();
        for i in 0..100 {
            let topic = if i % 2 == 0 { "t0" } else { "t1" };
            p.produce(Message::new(topic).value(format!("m{i}"))).unwrap();
        }
        assert_eq!(p.topics_created(), 2);
        assert_eq!(p.transport.created_topics.load(Ordering::SeqCst), 2);
        p.close().await.unwrap();
        assert_eq!(p.topics_created(), 2);
    }
}
