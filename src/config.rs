use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cross-component timeouts for the fabric.
///
/// Plain, serde-derived, with sane defaults — the embedding application is responsible for
/// sourcing a value however it sources the rest of its configuration (file, env, flags); this
/// crate does not read configuration itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FabricConfig {
    /// Upper bound on dialing a peer server for a `Status.HasNodeConn` RPC.
    #[serde(with = "duration_millis")]
    pub dial_timeout: Duration,
    /// Upper bound on the locator's whole fan-out, regardless of how many peers are queried.
    #[serde(with = "duration_millis")]
    pub fanout_timeout: Duration,
    /// Upper bound on opening a new substream against an already-live session.
    #[serde(with = "duration_millis")]
    pub substream_open_timeout: Duration,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
            fanout_timeout: Duration::from_secs(10),
            substream_open_timeout: Duration::from_secs(5),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
