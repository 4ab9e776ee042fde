//! Endpoint categories used to select a token bucket.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::status::RateLimitConfig;

/// Classification of an outbound API request.
///
/// Every request maps to exactly one category; [`EndpointType::General`] is
/// the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    /// Everything not covered by a more specific category
    General,
    /// Statistics and reporting queries
    Statistics,
    /// Message-send traffic
    SendMessage,
}

impl EndpointType {
    /// All categories, in a stable order.
    pub const ALL: [EndpointType; 3] = [
        EndpointType::General,
        EndpointType::Statistics,
        EndpointType::SendMessage,
    ];

    /// The configuration-facing name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointType::General => "general",
            EndpointType::Statistics => "statistics",
            EndpointType::SendMessage => "send_message",
        }
    }

    /// Limits applied when nothing else is configured.
    pub fn default_config(&self) -> RateLimitConfig {
        match self {
            EndpointType::General => RateLimitConfig::new(10, 20),
            EndpointType::Statistics => RateLimitConfig::new(2, 5),
            EndpointType::SendMessage => RateLimitConfig::new(5, 10),
        }
    }
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown category name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown endpoint type: {0}")]
pub struct UnknownEndpointType(pub String);

impl FromStr for EndpointType {
    type Err = UnknownEndpointType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "general" | "general_api" => Ok(EndpointType::General),
            "statistics" | "stats" => Ok(EndpointType::Statistics),
            "send_message" | "send" | "messages" => Ok(EndpointType::SendMessage),
            _ => Err(UnknownEndpointType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trips_through_from_str() {
        for endpoint in EndpointType::ALL {
            assert_eq!(endpoint.to_string().parse::<EndpointType>(), Ok(endpoint));
        }
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!("stats".parse(), Ok(EndpointType::Statistics));
        assert_eq!("Send-Message".parse(), Ok(EndpointType::SendMessage));
        assert_eq!("GENERAL_API".parse(), Ok(EndpointType::General));
        assert!("templates".parse::<EndpointType>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&EndpointType::SendMessage).unwrap();
        assert_eq!(json, "\"send_message\"");

        let parsed: EndpointType = serde_yaml::from_str("statistics").unwrap();
        assert_eq!(parsed, EndpointType::Statistics);
    }

    #[test]
    fn test_default_configs_enabled() {
        for endpoint in EndpointType::ALL {
            let config = endpoint.default_config();
            assert!(config.enabled);
            assert!(config.burst_capacity >= config.requests_per_second);
        }
    }
}
