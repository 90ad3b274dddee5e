//! Core types shared across the client.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Allocate a fresh random id.
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }

            pub const fn nil() -> Self {
                $name(Uuid::nil())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Globally unique item identifier, assigned client-side.
    ItemId,
    "ItemId"
);
uuid_id!(
    /// Identifier correlating a request with its replies.
    RequestId,
    "RequestId"
);
uuid_id!(
    /// Identifier tagging push notifications for a standing query.
    SubscriptionId,
    "SubscriptionId"
);
uuid_id!(
    /// Logical session with the server.
    SessionId,
    "SessionId"
);
uuid_id!(
    /// Identifies one local item cache in its change events.
    CacheId,
    "CacheId"
);

/// Content hash of an item's final payload (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(arr))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Latest instant an item may expire at (one day short of the
    /// representable maximum, so later arithmetic cannot overflow).
    pub const MAX: Timestamp = Timestamp(i64::MAX - MICROS_PER_DAY);

    pub const ZERO: Timestamp = Timestamp(0);

    /// Current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    /// Add a duration, saturating at [`Timestamp::MAX`].
    pub fn saturating_add(self, d: Duration) -> Self {
        let micros = i64::try_from(d.as_micros()).unwrap_or(i64::MAX);
        Timestamp(self.0.saturating_add(micros).min(Self::MAX.0))
    }

    /// Time elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub fn since(self, earlier: Timestamp) -> Duration {
        if self.0 <= earlier.0 {
            Duration::ZERO
        } else {
            Duration::from_micros((self.0 - earlier.0) as u64)
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Broad category of an item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ItemKind {
    /// Matches any kind in queries.
    Undefined,
    #[default]
    Object,
    Debug,
    System,
}

/// Serializer used to turn a typed value into text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SerialFormat {
    /// Use the default (schema) serializer.
    #[default]
    Undefined,
    /// MessagePack, hex encoded.
    Binary,
    /// Plain JSON.
    Json,
    /// Type-tagged JSON document.
    Schema,
}

impl SerialFormat {
    pub const ALL: [SerialFormat; 4] = [
        SerialFormat::Undefined,
        SerialFormat::Binary,
        SerialFormat::Json,
        SerialFormat::Schema,
    ];

    /// Numeric code recorded in the system property set.
    pub fn code(self) -> i64 {
        match self {
            SerialFormat::Undefined => 0,
            SerialFormat::Binary => 1,
            SerialFormat::Json => 2,
            SerialFormat::Schema => 3,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => SerialFormat::Binary,
            2 => SerialFormat::Json,
            3 => SerialFormat::Schema,
            _ => SerialFormat::Undefined,
        }
    }
}

/// Ordered name/value property bag.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySet(BTreeMap<String, serde_json::Value>);

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.0.insert(name.into(), value);
    }

    /// Builder-style `set`.
    pub fn with(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.set(name, value);
        self
    }

    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.0
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_str())
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(|v| v.as_i64())
    }

    pub fn get_raw(&self, name: &str) -> Option<&serde_json::Value> {
        self.0.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<serde_json::Value> {
        self.0.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Copy every property of `other` into `self`.
    pub fn merge(&mut self, other: &PropertySet) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Opaque filter or ordering expression, evaluated by the server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryExpr(String);

impl QueryExpr {
    pub fn new(expr: impl Into<String>) -> Self {
        QueryExpr(expr.into())
    }

    /// Expression matching every item.
    pub fn all() -> Self {
        QueryExpr("true".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_all(&self) -> bool {
        self.0.trim() == "true"
    }
}

impl fmt::Display for QueryExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provenance of this client, stamped into every frozen item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub appl_name: String,
    pub appl_version: String,
    pub core_version: String,
    pub host_name: String,
    pub user_name: String,
    pub user_identity: String,
    pub env: String,
    pub node_id: Uuid,
}

impl Default for ClientInfo {
    fn default() -> Self {
        let user_name = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let host_name = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "localhost".to_string());
        Self {
            appl_name: "itemwire".to_string(),
            appl_version: env!("CARGO_PKG_VERSION").to_string(),
            core_version: env!("CARGO_PKG_VERSION").to_string(),
            user_identity: user_name.clone(),
            host_name,
            user_name,
            env: "dev".to_string(),
            node_id: Uuid::new_v4(),
        }
    }
}
