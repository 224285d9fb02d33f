/// Producer error taxonomy. Every public operation returns these as values;
/// broker-reported per-message failures are never raised here, they arrive
/// as the argument of the per-message delivery callback instead.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EgressError {
    /// Invalid or unrecognized client option during producer creation.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// No valid broker address was given.
    #[error("no valid brokers specified")]
    NoBrokers,
    /// Caller-supplied message is unusable; nothing was mutated.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    /// The broker client could not create a topic handle.
    #[error("failed to create topic: {0}")]
    TopicCreation(String),
    /// Submission to the broker client failed, e.g. its internal queue is
    /// saturated. The same message may be retried.
    #[error("produce failed: {0}")]
    Produce(String),
    /// A delivery callback itself failed; drainage stopped early and the
    /// remaining outcomes stay queued.
    #[error("delivery callback failed: {0}")]
    Callback(String),
    /// Fallible reservation failed while growing the topic cache or
    /// registering a callback.
    #[error("out of memory")]
    OutOfMemory,
    /// The producer session is closed.
    #[error("producer is closed")]
    Closed,
    /// An offloaded blocking call could not be joined.
    #[error("blocking call failed: {0}")]
    Offload(String),
}

impl EgressError {
    /// Whether retrying the same operation can succeed. Retries are the
    /// caller's responsibility, nothing here retries on its own.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, EgressError::Produce(_) | EgressError::TopicCreation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::EgressError;

    #[test]
    fn retryable() {
        assert!(EgressError::Produce("queue full".into()).is_retryable());
        assert!(EgressError::TopicCreation("down".into()).is_retryable());
        assert!(!EgressError::NoBrokers.is_retryable());
        assert!(!EgressError::Closed.is_retryable());
    }

    #[test]
    fn display_carries_client_message() {
        let e = EgressError::Configuration("unknown property \"xx\"".into());
        assert_eq!(e.to_string(), "configuration error: unknown property \"xx\"");
    }
}
