use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("chatstream.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter =
    Counter::new("chatstream.client.request_errors");
pub(crate) static CLIENT_REQUEST_REJECTED: Counter =
    Counter::new("chatstream.client.request_rejected");

pub(crate) static STREAM_BYTES: Counter = Counter::new("chatstream.stream.bytes");
pub(crate) static STREAM_RECORDS: Counter = Counter::new("chatstream.stream.records");
pub(crate) static STREAM_MALFORMED: Counter = Counter::new("chatstream.stream.malformed");
pub(crate) static STREAM_PADDING: Counter = Counter::new("chatstream.stream.padding_lines");
pub(crate) static STREAM_DISCARDED_BYTES: Counter =
    Counter::new("chatstream.stream.discarded_bytes");

pub(crate) static SESSION_STARTED: Counter = Counter::new("chatstream.session.started");
pub(crate) static SESSION_COMPLETED: Counter = Counter::new("chatstream.session.completed");
pub(crate) static SESSION_FAILED: Counter = Counter::new("chatstream.session.failed");
pub(crate) static SESSION_CANCELLED: Counter = Counter::new("chatstream.session.cancelled");
pub(crate) static SESSION_TTFR: Moments = Moments::new("chatstream.session.ttfr_seconds");
pub(crate) static SESSION_DURATION: Moments =
    Moments::new("chatstream.session.duration_seconds");

pub(crate) static STORE_NOOPS: Counter = Counter::new("chatstream.store.noops");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_REQUEST_REJECTED);

    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_RECORDS);
    collector.register_counter(&STREAM_MALFORMED);
    collector.register_counter(&STREAM_PADDING);
    collector.register_counter(&STREAM_DISCARDED_BYTES);

    collector.register_counter(&SESSION_STARTED);
    collector.register_counter(&SESSION_COMPLETED);
    collector.register_counter(&SESSION_FAILED);
    collector.register_counter(&SESSION_CANCELLED);
    collector.register_moments(&SESSION_TTFR);
    collector.register_moments(&SESSION_DURATION);

    collector.register_counter(&STORE_NOOPS);
}
