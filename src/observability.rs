use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("zerox.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("zerox.client.request_errors");
pub(crate) static CLIENT_REPLAYS: Counter = Counter::new("zerox.client.replays");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("zerox.client.request_duration_seconds");

pub(crate) static REFRESH_EXCHANGES: Counter = Counter::new("zerox.refresh.exchanges");
pub(crate) static REFRESH_FAILURES: Counter = Counter::new("zerox.refresh.failures");
pub(crate) static REFRESH_JOINS: Counter = Counter::new("zerox.refresh.joins");
pub(crate) static REFRESH_STALE_REPLAYS: Counter = Counter::new("zerox.refresh.stale_replays");

pub(crate) static STREAM_FRAMES: Counter = Counter::new("zerox.stream.frames");
pub(crate) static STREAM_MALFORMED_LINES: Counter = Counter::new("zerox.stream.malformed_lines");
pub(crate) static STREAM_IGNORED_FRAMES: Counter = Counter::new("zerox.stream.ignored_frames");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("zerox.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("zerox.stream.bytes");
pub(crate) static STREAM_DURATION: Moments = Moments::new("zerox.stream.duration_seconds");

pub(crate) static TURNS_STARTED: Counter = Counter::new("zerox.chat.turns_started");
pub(crate) static TURNS_REJECTED: Counter = Counter::new("zerox.chat.turns_rejected");
pub(crate) static TURNS_DONE: Counter = Counter::new("zerox.chat.turns_done");
pub(crate) static TURNS_ERRORED: Counter = Counter::new("zerox.chat.turns_errored");
pub(crate) static TURNS_CANCELLED: Counter = Counter::new("zerox.chat.turns_cancelled");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_counter(&CLIENT_REPLAYS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&REFRESH_EXCHANGES);
    collector.register_counter(&REFRESH_FAILURES);
    collector.register_counter(&REFRESH_JOINS);
    collector.register_counter(&REFRESH_STALE_REPLAYS);

    collector.register_counter(&STREAM_FRAMES);
    collector.register_counter(&STREAM_MALFORMED_LINES);
    collector.register_counter(&STREAM_IGNORED_FRAMES);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&TURNS_STARTED);
    collector.register_counter(&TURNS_REJECTED);
    collector.register_counter(&TURNS_DONE);
    collector.register_counter(&TURNS_ERRORED);
    collector.register_counter(&TURNS_CANCELLED);
}
