use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_RPC_PORT: u16 = 50000;
pub const DEFAULT_STREAM_PORT: u16 = 50001;
pub const DEFAULT_CLIENT_NAME: &str = "krpc-rs";
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for [`Client::connect`](crate::Client::connect).
///
/// Deserializes from any serde format; missing fields take their defaults
/// and durations are written as `"250ms"` or `"10s"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub host: String,
    pub rpc_port: u16,
    pub stream_port: u16,
    /// Name shown for this client in the server UI.
    pub client_name: String,
    /// Skip the stream connection entirely.
    pub rpc_only: bool,
    /// Bound on dialing plus handshaking each connection.
    #[serde(with = "duration")]
    pub handshake_timeout: Duration,
    /// Bound on one request/response round trip. Unlimited when unset.
    #[serde(with = "duration::option")]
    pub call_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            rpc_only: false,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_ports(mut self, rpc_port: u16, stream_port: u16) -> Self {
        self.rpc_port = rpc_port;
        self.stream_port = stream_port;
        self
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn rpc_only(mut self) -> Self {
        self.rpc_only = true;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }
}

/// Parse `"<n>ms"`, `"<n>s"` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Whole milliseconds, rounded up so a nonzero duration never formats as
/// zero and can always be parsed back.
fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_nanos().div_ceil(1_000_000);
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

mod duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw).map_err(de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{de, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => super::serialize(duration, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::super::parse_duration(&raw).map_err(de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.rpc_port, 50000);
        assert_eq!(config.stream_port, 50001);
        assert!(!config.rpc_only);
        assert_eq!(config.call_timeout, None);
    }

    #[test]
    fn deserialize_partial_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"host": "10.0.0.5", "client_name": "telemetry", "call_timeout": "250ms"}"#,
        )
        .expect("config should parse");
        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.client_name, "telemetry");
        assert_eq!(config.rpc_port, DEFAULT_RPC_PORT);
        assert_eq!(config.call_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.handshake_timeout, DEFAULT_HANDSHAKE_TIMEOUT);
    }

    #[test]
    fn deserialize_rejects_unknown_fields_and_bad_durations() {
        assert!(serde_json::from_str::<ClientConfig>(r#"{"hostname": "x"}"#).is_err());
        assert!(serde_json::from_str::<ClientConfig>(r#"{"handshake_timeout": "0s"}"#).is_err());
        assert!(serde_json::from_str::<ClientConfig>(r#"{"call_timeout": "soon"}"#).is_err());
    }

    #[test]
    fn serialize_roundtrip() {
        let config = ClientConfig::default()
            .with_host("ksp.local")
            .with_ports(6000, 6001)
            .with_call_timeout(Duration::from_millis(1500));
        let json = serde_json::to_string(&config).expect("config should serialize");
        assert!(json.contains(r#""call_timeout":"1500ms""#));
        assert!(json.contains(r#""handshake_timeout":"10s""#));

        let back: ClientConfig = serde_json::from_str(&json).expect("config should parse");
        assert_eq!(back, config);
    }

    #[test]
    fn sub_millisecond_timeouts_round_up() {
        assert_eq!(format_duration(&Duration::from_micros(500)), "1ms");
        assert_eq!(format_duration(&Duration::from_micros(1500)), "2ms");
        assert_eq!(format_duration(&Duration::from_millis(2000)), "2s");
        assert_eq!(
            format_duration(&(Duration::from_secs(2) + Duration::from_nanos(1))),
            "2001ms"
        );

        let config = ClientConfig::default().with_call_timeout(Duration::from_micros(500));
        let json = serde_json::to_string(&config).expect("config should serialize");
        let back: ClientConfig = serde_json::from_str(&json).expect("config should parse");
        assert_eq!(back.call_timeout, Some(Duration::from_millis(1)));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration(" 5s "), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("20ms"), Ok(Duration::from_millis(20)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("0ms").is_err());
    }

    #[test]
    fn builders() {
        let config = ClientConfig::default()
            .with_client_name("telemetry")
            .rpc_only()
            .with_handshake_timeout(Duration::from_secs(2));
        assert_eq!(config.client_name, "telemetry");
        assert!(config.rpc_only);
        assert_eq!(config.handshake_timeout, Duration::from_secs(2));
    }
}
