use std::sync::Arc;
use std::time::Duration;

use crate::config::ProducerConfig;
use crate::queue::{DeliveryQueue, DeliveryToken};
use crate::Result;

/// The broker-client seam. Implementations own the client's connections,
/// internal threads and wire protocol; the session only drives this surface.
///
/// Threading contract: `submit` and `create_topic` are invoked from the
/// caller thread only; `poll` and `flush` run on an offload thread and are
/// the calls during which the client invokes delivery callbacks, so
/// implementations push onto the `DeliveryQueue` they were handed at
/// connect time from whatever thread the client uses for that.
pub trait Transport: Send + Sync + Sized + 'static {
    /// Opaque per-topic handle; cheap to clone. Broker-side resources are
    /// released when the last clone drops.
    type Topic: Clone + Send + Sync;

    /// Builds the client from `cfg` (options passed through verbatim) and
    /// wires `deliveries` as the destination for delivery confirmations.
    /// Option errors surface as `Configuration`.
    fn connect(cfg: &ProducerConfig, deliveries: Arc<DeliveryQueue>) -> Result<Self>;

    /// Registers `name` with the client, `TopicCreation` on failure.
    fn create_topic(&self, name: &str) -> Result<Self::Topic>;

    /// Hands one message to the client. Key and value are copied into the
    /// client's own buffers, nothing borrowed is retained past the call.
    /// `token`, when present, is echoed back in the delivery outcome.
    /// Fails with `Produce` when the client cannot accept the message.
    fn submit(
        &self,
        topic: &Self::Topic,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        token: Option<DeliveryToken>,
    ) -> Result<()>;

    /// Services the client's event and callback processing for at most
    /// `timeout`. May block the OS thread for the full duration.
    fn poll(&self, timeout: Duration);

    /// One bounded flush step; returns true while deliveries are still in
    /// flight and the step timed out before they settled.
    fn flush(&self, timeout: Duration) -> bool;
}
