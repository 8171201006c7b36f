use std::collections::HashMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// A single MQTT v5 user property as EMQX renders it in the ordered list representation.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct UserPropertyPair {
    pub key: String,
    pub value: String,
}

/// MQTT publish properties attached to a message.
///
/// EMQX emits user properties twice: once as a flat mapping and once as an ordered list of
/// pairs. Lookups go through `user_property`, which tries the mapping first and only falls back
/// to the pairs, so both representations never act as separate sources of truth.
#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Clone)]
pub struct PublishProperties {
    #[serde(rename = "User-Property", default)]
    pub user_property: Option<HashMap<String, String>>,
    #[serde(rename = "User-Property-Pairs", default, deserialize_with = "null_is_default")]
    pub user_property_pairs: Vec<UserPropertyPair>,
}

impl PublishProperties {
    pub fn user_property(&self, key: &str) -> Option<&str> {
        self.user_property
            .as_ref()
            .and_then(|properties| properties.get(key))
            .or_else(|| {
                self.user_property_pairs
                    .iter()
                    .find(|pair| pair.key == key)
                    .map(|pair| &pair.value)
            })
            .map(String::as_str)
    }
}

// EMQX renders absent values as `null`; treat those like missing fields.
fn null_is_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let opt = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

/// Errors returned when interpreting an envelope payload.
#[derive(thiserror::Error, Debug)]
#[error("payload does not match the expected shape: {0}")]
pub struct PayloadError(#[from] pub serde_json::Error);

/// A message publish event as delivered by the EMQX webhook data bridge.
#[derive(Deserialize, Serialize, Debug, Default, PartialEq, Clone)]
pub struct EventEnvelope {
    #[serde(default, deserialize_with = "null_is_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_is_default")]
    pub event: String,
    #[serde(default, deserialize_with = "null_is_default")]
    pub topic: String,
    pub payload: String,
    #[serde(default, deserialize_with = "null_is_default")]
    pub qos: u8,
    #[serde(rename = "clientid", default, deserialize_with = "null_is_default")]
    pub client_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "peerhost", default, deserialize_with = "null_is_default")]
    pub peer_host: String,
    #[serde(rename = "peername", default, deserialize_with = "null_is_default")]
    pub peer_name: String,
    #[serde(default, deserialize_with = "null_is_default")]
    pub node: String,
    #[serde(default, deserialize_with = "null_is_default")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "null_is_default")]
    pub publish_received_at: i64,
    #[serde(default, deserialize_with = "null_is_default")]
    pub flags: HashMap<String, bool>,
    #[serde(default, deserialize_with = "null_is_default")]
    pub metadata: HashMap<String, Value>,
    #[serde(default, deserialize_with = "null_is_default")]
    pub client_attrs: HashMap<String, Value>,
    #[serde(default, deserialize_with = "null_is_default")]
    pub pub_props: PublishProperties,
}

impl EventEnvelope {
    /// Decode an envelope from the raw request body.
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Look up a user property by exact key.
    pub fn property_value(&self, key: &str) -> Option<&str> {
        self.pub_props.user_property(key)
    }

    /// Parse the payload string as JSON into the shape requested by the caller.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}
