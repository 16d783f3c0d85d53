pub mod client;
pub mod heartbeat;
pub mod local_ip;
pub mod registry;

/// Wall-clock Unix seconds; expiries are compared against this on every host.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
