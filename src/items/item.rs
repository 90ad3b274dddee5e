//! The item value and its freeze pipeline.

use super::codec::{self, ZLIB_ALGORITHM};
use super::props;
use crate::clock::Clock;
use crate::config::LEGACY_APP_SCOPE;
use crate::crypto::CryptoProvider;
use crate::error::{ClientError, Result};
use crate::types::{ClientInfo, Hash, ItemId, ItemKind, PropertySet, SerialFormat, Timestamp};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Algorithm id recorded for each crypto layer that was applied.
const CRYPTO_ALGORITHM: i64 = 1;

/// Item as carried by the transport. Always describes a frozen item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireItem {
    pub id: ItemId,
    pub kind: ItemKind,
    pub name: String,
    pub app_scope: String,
    pub data_type: Option<String>,
    pub transient: bool,
    pub app_props: PropertySet,
    pub sys_props: PropertySet,
    pub net_scope: Option<String>,
    pub created: Timestamp,
    pub expires: Timestamp,
    /// Final (post-encryption) buffer. Empty for tombstones and info-only loads.
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    /// Server update sequence number, zero until stored.
    pub store_usn: i64,
}

/// Collaborators `freeze` needs from the owning client.
pub struct FreezeContext<'a> {
    pub crypto: &'a Arc<dyn CryptoProvider>,
    pub clock: &'a dyn Clock,
    pub client_info: &'a ClientInfo,
    /// Format used when the item leaves its own undefined.
    pub default_format: SerialFormat,
}

/// Expiry as set by the caller. Converted to `At` on freeze.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Expiry {
    Lifetime(Duration),
    At(Timestamp),
}

type AnyValue = Arc<dyn Any + Send + Sync>;
type EncodeFn = fn(&AnyValue, SerialFormat, &str) -> Result<(String, SerialFormat)>;

fn encode_as<T: Serialize + Send + Sync + 'static>(
    value: &AnyValue,
    format: SerialFormat,
    type_name: &str,
) -> Result<(String, SerialFormat)> {
    let typed = (**value)
        .downcast_ref::<T>()
        .ok_or_else(|| ClientError::Unexpected("payload type changed".into()))?;
    codec::serialize(typed, format, type_name)
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    if full.contains('<') {
        full
    } else {
        full.rsplit("::").next().unwrap_or(full)
    }
}

#[derive(Clone)]
enum RawData {
    Unset,
    Object { value: AnyValue, encode: EncodeFn },
    Text(Option<String>),
}

#[derive(Clone, Debug)]
struct TextCache {
    text: Option<String>,
    format: SerialFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SignState {
    Unknown,
    Valid,
    Invalid,
}

#[derive(Clone)]
struct FrozenPayload {
    payload: Vec<u8>,
    signature: Option<Vec<u8>>,
    hash: Hash,
}

/// A named, typed unit of data exchanged with the store.
///
/// Fresh items are mutable until [`Item::freeze`]; after that every setter
/// returns [`ClientError::AlreadyFrozen`]. Items received from the server are
/// born frozen. Decoding (decrypt, decompress, deserialize) is lazy and each
/// stage is cached.
pub struct Item {
    id: ItemId,
    kind: ItemKind,
    name: Option<String>,
    app_scope: String,
    data_type: Option<String>,
    transient: bool,
    app_props: PropertySet,
    sys_props: PropertySet,
    net_scope: Option<String>,
    serial_format: SerialFormat,
    transport_key_id: Option<String>,
    recipient_key_id: Option<String>,
    signer_key_id: Option<String>,
    created: Timestamp,
    expiry: Expiry,
    store_usn: i64,
    raw: RawData,
    frozen: Option<FrozenPayload>,
    crypto: Option<Arc<dyn CryptoProvider>>,

    text: Mutex<Option<TextCache>>,
    /// Decrypted, still compressed, bytes.
    plain: Mutex<Option<Arc<Vec<u8>>>>,
    decoded: Mutex<Option<AnyValue>>,
    signed: Mutex<SignState>,
}

impl Item {
    fn blank() -> Self {
        Self {
            id: ItemId::new(),
            kind: ItemKind::Object,
            name: None,
            app_scope: LEGACY_APP_SCOPE.to_string(),
            data_type: None,
            transient: false,
            app_props: PropertySet::new(),
            sys_props: PropertySet::new(),
            net_scope: None,
            serial_format: SerialFormat::Undefined,
            transport_key_id: None,
            recipient_key_id: None,
            signer_key_id: None,
            created: Timestamp::now(),
            expiry: Expiry::Lifetime(Duration::MAX),
            store_usn: 0,
            raw: RawData::Unset,
            frozen: None,
            crypto: None,
            text: Mutex::new(None),
            plain: Mutex::new(None),
            decoded: Mutex::new(None),
            signed: Mutex::new(SignState::Unknown),
        }
    }

    /// A fresh item with no payload. Saving it writes a tombstone.
    pub fn new(name: impl Into<String>) -> Self {
        let mut item = Self::blank();
        item.name = Some(name.into());
        item
    }

    /// A fresh item carrying a typed value.
    pub fn with_object<T>(name: impl Into<String>, value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        let mut item = Self::new(name);
        item.put_object(value);
        item
    }

    /// A fresh item carrying pre-serialized text. `None` is a tombstone.
    pub fn with_text(
        name: impl Into<String>,
        text: Option<String>,
        data_type: impl Into<String>,
    ) -> Self {
        let mut item = Self::new(name);
        item.raw = RawData::Text(text);
        item.data_type = Some(data_type.into());
        item
    }

    pub fn builder(name: impl Into<String>) -> ItemBuilder {
        ItemBuilder {
            item: Self::new(name),
        }
    }

    /// Rebuild an item received from the server. The result is frozen.
    pub fn from_wire(wire: WireItem, crypto: Arc<dyn CryptoProvider>) -> Self {
        let key = |name: &str| wire.sys_props.get_str(name).map(str::to_string);
        let transport_key_id = key(props::TRANSPORT_KEY_ID);
        let recipient_key_id = key(props::RECIPIENT_KEY_ID);
        let signer_key_id = key(props::SIGNER_KEY_ID);
        let serial_format = wire
            .sys_props
            .get_i64(props::SERIAL_FORMAT)
            .map(SerialFormat::from_code)
            .unwrap_or_default();

        let signature = if wire.signature.is_empty() {
            None
        } else {
            Some(wire.signature)
        };
        let frozen = FrozenPayload {
            hash: Hash::from_bytes(&wire.payload),
            payload: wire.payload,
            signature,
        };

        Self {
            id: wire.id,
            kind: wire.kind,
            name: Some(wire.name),
            app_scope: wire.app_scope,
            data_type: wire.data_type,
            transient: wire.transient,
            app_props: wire.app_props,
            sys_props: wire.sys_props,
            net_scope: wire.net_scope,
            serial_format,
            transport_key_id,
            recipient_key_id,
            signer_key_id,
            created: wire.created,
            expiry: Expiry::At(wire.expires),
            store_usn: wire.store_usn,
            raw: RawData::Unset,
            frozen: Some(frozen),
            crypto: Some(crypto),
            text: Mutex::new(None),
            plain: Mutex::new(None),
            decoded: Mutex::new(None),
            signed: Mutex::new(SignState::Unknown),
        }
    }

    /// Wire form of a frozen item.
    pub fn to_wire(&self) -> Result<WireItem> {
        let frozen = self
            .frozen
            .as_ref()
            .ok_or_else(|| ClientError::Unexpected("item must be frozen before sending".into()))?;
        Ok(WireItem {
            id: self.id,
            kind: self.kind,
            name: self.name.clone().unwrap_or_default(),
            app_scope: self.app_scope.clone(),
            data_type: self.data_type.clone(),
            transient: self.transient,
            app_props: self.app_props.clone(),
            sys_props: self.sys_props.clone(),
            net_scope: self.net_scope.clone(),
            created: self.created,
            expires: self.expires(),
            payload: frozen.payload.clone(),
            signature: frozen.signature.clone().unwrap_or_default(),
            store_usn: self.store_usn,
        })
    }

    fn put_object<T: Serialize + Send + Sync + 'static>(&mut self, value: T) {
        if self.data_type.is_none() {
            self.data_type = Some(short_type_name::<T>().to_string());
        }
        self.raw = RawData::Object {
            value: Arc::new(value),
            encode: encode_as::<T>,
        };
        *self.text.get_mut() = None;
        *self.decoded.get_mut() = None;
    }

    fn check_mutable(&self) -> Result<()> {
        if self.frozen.is_some() {
            Err(ClientError::AlreadyFrozen)
        } else {
            Ok(())
        }
    }

    // --- Freeze ---

    /// Run the transform pipeline and fix the item's content.
    ///
    /// Freezing an already frozen item does nothing. On error the item is
    /// left unfrozen and unchanged.
    pub fn freeze(&mut self, ctx: &FreezeContext<'_>) -> Result<()> {
        if self.frozen.is_some() {
            return Ok(());
        }
        if self.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            return Err(ClientError::MissingName);
        }

        let created = ctx.clock.now();
        let expires = match self.expiry {
            Expiry::At(at) => at.max(created),
            Expiry::Lifetime(lifetime) => created.saturating_add(lifetime),
        };

        let serialized = self.serialized(ctx.default_format)?;
        let mut sys = self.sys_props.clone();
        sys.set(props::SERIAL_FORMAT, serialized.format.code());
        sys.set(
            props::TEXT_LENGTH,
            serialized.text.as_ref().map_or(0, String::len),
        );

        let compressed = codec::compress(serialized.text.as_deref())?;
        sys.set(props::COMPRESSION_ALGORITHM, ZLIB_ALGORITHM);
        sys.set(props::COMPRESSED_LENGTH, compressed.len());

        let mut payload: Cow<'_, [u8]> = Cow::Borrowed(&compressed);
        if let Some(key) = &self.transport_key_id {
            payload = Cow::Owned(ctx.crypto.encrypt_with_transport_key(key, &payload)?);
            sys.set(props::TRANSPORT_ALGORITHM, CRYPTO_ALGORITHM);
            sys.set(props::TRANSPORT_LENGTH, payload.len());
            sys.set(props::TRANSPORT_KEY_ID, key);
        }
        if let Some(key) = &self.recipient_key_id {
            payload = Cow::Owned(ctx.crypto.encrypt_with_public_key(key, &payload)?);
            sys.set(props::PAYLOAD_ALGORITHM, CRYPTO_ALGORITHM);
            sys.set(props::RECIPIENT_KEY_ID, key);
        }
        let payload = payload.into_owned();
        let hash = Hash::from_bytes(&payload);
        sys.set(props::PAYLOAD_LENGTH, payload.len());

        let signature = match &self.signer_key_id {
            Some(key) => {
                let signature = ctx.crypto.create_signature(key, &payload)?;
                sys.set(props::PAYLOAD_ALGORITHM, CRYPTO_ALGORITHM);
                sys.set(props::SIGNER_KEY_ID, key);
                Some(signature)
            }
            None => None,
        };

        let info = ctx.client_info;
        sys.set(props::APPL_NAME, &info.appl_name);
        sys.set(props::APPL_VERSION, &info.appl_version);
        sys.set(props::CORE_VERSION, &info.core_version);
        sys.set(props::HOST_NAME, &info.host_name);
        sys.set(props::USER_NAME, &info.user_name);
        sys.set(props::USER_IDENTITY, &info.user_identity);
        sys.set(props::ENVIRONMENT, &info.env);
        sys.set(props::NODE_ID, info.node_id.to_string());

        self.created = created;
        self.expiry = Expiry::At(expires);
        self.sys_props = sys;
        self.serial_format = serialized.format;
        self.crypto = Some(Arc::clone(ctx.crypto));
        *self.plain.get_mut() = Some(Arc::new(compressed));
        self.frozen = Some(FrozenPayload {
            payload,
            signature,
            hash,
        });
        Ok(())
    }

    /// Serialize the raw data, once.
    fn serialized(&self, default_format: SerialFormat) -> Result<TextCache> {
        let mut cache = self.text.lock();
        if let Some(cached) = cache.as_ref() {
            return Ok(cached.clone());
        }
        let computed = match &self.raw {
            RawData::Unset => TextCache {
                text: None,
                format: SerialFormat::Undefined,
            },
            RawData::Text(text) => TextCache {
                text: text.clone(),
                format: self.serial_format,
            },
            RawData::Object { value, encode } => {
                let requested = if self.serial_format == SerialFormat::Undefined {
                    default_format
                } else {
                    self.serial_format
                };
                let (text, format) =
                    encode(value, requested, self.data_type.as_deref().unwrap_or(""))?;
                TextCache {
                    text: Some(text),
                    format,
                }
            }
        };
        *cache = Some(computed.clone());
        Ok(computed)
    }

    // --- Reverse path ---

    fn algorithm(&self, name: &str) -> i64 {
        self.sys_props.get_i64(name).unwrap_or(0)
    }

    /// Strip the crypto layers, asymmetric first.
    fn plain_bytes(&self) -> Result<Arc<Vec<u8>>> {
        let mut cache = self.plain.lock();
        if let Some(plain) = cache.as_ref() {
            return Ok(Arc::clone(plain));
        }
        let frozen = self
            .frozen
            .as_ref()
            .ok_or_else(|| ClientError::Unexpected("item has no payload".into()))?;

        let mut data: Cow<'_, [u8]> = Cow::Borrowed(&frozen.payload);
        if self.algorithm(props::PAYLOAD_ALGORITHM) > 0 {
            if let Some(key) = &self.recipient_key_id {
                data = Cow::Owned(self.crypto()?.decrypt_with_secret_key(key, &data)?);
            }
        }
        if self.algorithm(props::TRANSPORT_ALGORITHM) > 0 {
            if let Some(key) = &self.transport_key_id {
                data = Cow::Owned(self.crypto()?.decrypt_with_transport_key(key, &data)?);
            }
        }
        let plain = Arc::new(data.into_owned());
        *cache = Some(Arc::clone(&plain));
        Ok(plain)
    }

    fn crypto(&self) -> Result<&Arc<dyn CryptoProvider>> {
        self.crypto
            .as_ref()
            .ok_or_else(|| ClientError::Unexpected("no crypto provider attached".into()))
    }

    fn decoded_text(&self) -> Result<TextCache> {
        let received = self.frozen.is_some() && matches!(self.raw, RawData::Unset);
        if !received {
            return self.serialized(SerialFormat::Undefined);
        }
        let mut cache = self.text.lock();
        if let Some(cached) = cache.as_ref() {
            return Ok(cached.clone());
        }
        let plain = self.plain_bytes()?;
        let computed = TextCache {
            text: codec::decompress(&plain)?,
            format: self.serial_format,
        };
        *cache = Some(computed.clone());
        Ok(computed)
    }

    /// Serialized text. `None` for a tombstone.
    pub fn text(&self) -> Result<Option<String>> {
        Ok(self.decoded_text()?.text)
    }

    /// Typed value, decoded on first access and cached.
    ///
    /// Returns `None` for a tombstone.
    pub fn data<T>(&self) -> Result<Option<Arc<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        if let RawData::Object { value, .. } = &self.raw {
            if let Ok(typed) = Arc::clone(value).downcast::<T>() {
                return Ok(Some(typed));
            }
        }
        let mut decoded = self.decoded.lock();
        if let Some(value) = decoded.as_ref() {
            if let Ok(typed) = Arc::clone(value).downcast::<T>() {
                return Ok(Some(typed));
            }
        }
        let cache = self.decoded_text()?;
        let text = match cache.text {
            Some(text) if !text.is_empty() => text,
            _ => return Ok(None),
        };
        let typed: Arc<T> = Arc::new(codec::deserialize(
            &text,
            cache.format,
            self.data_type.as_deref(),
        )?);
        *decoded = Some(Arc::clone(&typed) as AnyValue);
        Ok(Some(typed))
    }

    /// True if the payload is signed and the signature verifies.
    ///
    /// Verified once; an unverifiable signature reads as unsigned.
    pub fn is_signed(&self) -> bool {
        let mut state = self.signed.lock();
        if *state == SignState::Unknown {
            *state = if self.verify_signature() {
                SignState::Valid
            } else {
                SignState::Invalid
            };
        }
        *state == SignState::Valid
    }

    fn verify_signature(&self) -> bool {
        if self.algorithm(props::PAYLOAD_ALGORITHM) <= 0 {
            return false;
        }
        match (&self.frozen, &self.signer_key_id, &self.crypto) {
            (Some(frozen), Some(key), Some(crypto)) => match &frozen.signature {
                Some(signature) => crypto.verify_signature(key, &frozen.payload, signature),
                None => false,
            },
            _ => false,
        }
    }

    /// True if the payload is encrypted for a recipient.
    pub fn is_secret(&self) -> bool {
        self.algorithm(props::PAYLOAD_ALGORITHM) > 0 && self.recipient_key_id.is_some()
    }

    pub fn is_tombstone(&self) -> Result<bool> {
        Ok(self.text()?.map_or(true, |t| t.is_empty()))
    }

    /// True while `at` is before the item's expiry.
    pub fn is_current(&self, at: Timestamp) -> bool {
        at < self.expires()
    }

    // --- Getters ---

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn app_scope(&self) -> &str {
        &self.app_scope
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    pub fn transient(&self) -> bool {
        self.transient
    }

    pub fn app_props(&self) -> &PropertySet {
        &self.app_props
    }

    pub fn sys_props(&self) -> &PropertySet {
        &self.sys_props
    }

    pub fn net_scope(&self) -> Option<&str> {
        self.net_scope.as_deref()
    }

    /// Requested format before freeze, format actually used after.
    pub fn serial_format(&self) -> SerialFormat {
        self.serial_format
    }

    pub fn transport_key_id(&self) -> Option<&str> {
        self.transport_key_id.as_deref()
    }

    pub fn recipient_key_id(&self) -> Option<&str> {
        self.recipient_key_id.as_deref()
    }

    pub fn signer_key_id(&self) -> Option<&str> {
        self.signer_key_id.as_deref()
    }

    pub fn created(&self) -> Timestamp {
        self.created
    }

    /// Absolute expiry. Before freeze a lifetime is measured from construction.
    pub fn expires(&self) -> Timestamp {
        match self.expiry {
            Expiry::At(at) => at,
            Expiry::Lifetime(lifetime) => self.created.saturating_add(lifetime),
        }
    }

    pub fn lifetime(&self) -> Duration {
        match self.expiry {
            Expiry::Lifetime(lifetime) => lifetime,
            Expiry::At(at) => at.since(self.created),
        }
    }

    pub fn store_usn(&self) -> i64 {
        self.store_usn
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.frozen.as_ref().map(|f| f.payload.as_slice())
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.frozen.as_ref().and_then(|f| f.signature.as_deref())
    }

    pub fn payload_hash(&self) -> Option<Hash> {
        self.frozen.as_ref().map(|f| f.hash)
    }

    // --- Setters ---

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<()> {
        self.check_mutable()?;
        self.name = Some(name.into());
        Ok(())
    }

    pub fn set_kind(&mut self, kind: ItemKind) -> Result<()> {
        self.check_mutable()?;
        self.kind = kind;
        Ok(())
    }

    pub fn set_app_scope(&mut self, scope: impl Into<String>) -> Result<()> {
        self.check_mutable()?;
        self.app_scope = scope.into();
        Ok(())
    }

    pub fn set_data_type(&mut self, data_type: impl Into<String>) -> Result<()> {
        self.check_mutable()?;
        self.data_type = Some(data_type.into());
        Ok(())
    }

    pub fn set_transient(&mut self, transient: bool) -> Result<()> {
        self.check_mutable()?;
        self.transient = transient;
        Ok(())
    }

    pub fn set_net_scope(&mut self, scope: Option<String>) -> Result<()> {
        self.check_mutable()?;
        self.net_scope = scope;
        Ok(())
    }

    pub fn set_app_prop(&mut self, name: impl Into<String>, value: impl Serialize) -> Result<()> {
        self.check_mutable()?;
        self.app_props.set(name, value);
        Ok(())
    }

    pub fn set_app_props(&mut self, props: PropertySet) -> Result<()> {
        self.check_mutable()?;
        self.app_props = props;
        Ok(())
    }

    pub fn set_sys_prop(&mut self, name: impl Into<String>, value: impl Serialize) -> Result<()> {
        self.check_mutable()?;
        self.sys_props.set(name, value);
        Ok(())
    }

    /// Explicit expiry; wins over any lifetime.
    pub fn set_expires(&mut self, at: Timestamp) -> Result<()> {
        self.check_mutable()?;
        self.expiry = Expiry::At(at);
        Ok(())
    }

    pub fn set_lifetime(&mut self, lifetime: Duration) -> Result<()> {
        self.check_mutable()?;
        self.expiry = Expiry::Lifetime(lifetime);
        Ok(())
    }

    pub fn set_serial_format(&mut self, format: SerialFormat) -> Result<()> {
        self.check_mutable()?;
        self.serial_format = format;
        *self.text.get_mut() = None;
        Ok(())
    }

    pub fn set_transport_key_id(&mut self, key_id: Option<String>) -> Result<()> {
        self.check_mutable()?;
        self.transport_key_id = key_id;
        Ok(())
    }

    pub fn set_recipient_key_id(&mut self, key_id: Option<String>) -> Result<()> {
        self.check_mutable()?;
        self.recipient_key_id = key_id;
        Ok(())
    }

    pub fn set_signer_key_id(&mut self, key_id: Option<String>) -> Result<()> {
        self.check_mutable()?;
        self.signer_key_id = key_id;
        Ok(())
    }

    pub fn set_object<T>(&mut self, value: T) -> Result<()>
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.check_mutable()?;
        self.put_object(value);
        Ok(())
    }

    pub fn set_text(&mut self, text: Option<String>) -> Result<()> {
        self.check_mutable()?;
        self.raw = RawData::Text(text);
        *self.text.get_mut() = None;
        *self.decoded.get_mut() = None;
        Ok(())
    }
}

impl Clone for Item {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind,
            name: self.name.clone(),
            app_scope: self.app_scope.clone(),
            data_type: self.data_type.clone(),
            transient: self.transient,
            app_props: self.app_props.clone(),
            sys_props: self.sys_props.clone(),
            net_scope: self.net_scope.clone(),
            serial_format: self.serial_format,
            transport_key_id: self.transport_key_id.clone(),
            recipient_key_id: self.recipient_key_id.clone(),
            signer_key_id: self.signer_key_id.clone(),
            created: self.created,
            expiry: self.expiry,
            store_usn: self.store_usn,
            raw: self.raw.clone(),
            frozen: self.frozen.clone(),
            crypto: self.crypto.clone(),
            text: Mutex::new(self.text.lock().clone()),
            plain: Mutex::new(self.plain.lock().clone()),
            decoded: Mutex::new(self.decoded.lock().clone()),
            signed: Mutex::new(*self.signed.lock()),
        }
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("data_type", &self.data_type)
            .field("frozen", &self.frozen.is_some())
            .field("created", &self.created)
            .field("expires", &self.expires())
            .finish()
    }
}

/// Builder for fresh items.
pub struct ItemBuilder {
    item: Item,
}

impl ItemBuilder {
    pub fn object<T: Serialize + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.item.put_object(value);
        self
    }

    pub fn text(mut self, text: impl Into<String>, data_type: impl Into<String>) -> Self {
        self.item.raw = RawData::Text(Some(text.into()));
        self.item.data_type = Some(data_type.into());
        self
    }

    pub fn kind(mut self, kind: ItemKind) -> Self {
        self.item.kind = kind;
        self
    }

    pub fn app_scope(mut self, scope: impl Into<String>) -> Self {
        self.item.app_scope = scope.into();
        self
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.item.data_type = Some(data_type.into());
        self
    }

    pub fn transient(mut self, transient: bool) -> Self {
        self.item.transient = transient;
        self
    }

    pub fn app_prop(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        self.item.app_props.set(name, value);
        self
    }

    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.item.expiry = Expiry::Lifetime(lifetime);
        self
    }

    pub fn expires(mut self, at: Timestamp) -> Self {
        self.item.expiry = Expiry::At(at);
        self
    }

    pub fn serial_format(mut self, format: SerialFormat) -> Self {
        self.item.serial_format = format;
        self
    }

    pub fn transport_key(mut self, key_id: impl Into<String>) -> Self {
        self.item.transport_key_id = Some(key_id.into());
        self
    }

    pub fn recipient_key(mut self, key_id: impl Into<String>) -> Self {
        self.item.recipient_key_id = Some(key_id.into());
        self
    }

    pub fn signer_key(mut self, key_id: impl Into<String>) -> Self {
        self.item.signer_key_id = Some(key_id.into());
        self
    }

    pub fn build(self) -> Item {
        self.item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::CryptoError;
    use serde::Serializer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reversible toy crypto: XOR with the key id bytes, signature = hash.
    struct XorCrypto;

    fn xor(key: &str, data: &[u8]) -> Vec<u8> {
        let key = key.as_bytes();
        data.iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % key.len()])
            .collect()
    }

    impl CryptoProvider for XorCrypto {
        fn encrypt_with_transport_key(&self, k: &str, d: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            Ok(xor(k, d))
        }
        fn decrypt_with_transport_key(&self, k: &str, d: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            Ok(xor(k, d))
        }
        fn encrypt_with_public_key(&self, k: &str, d: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            Ok(xor(k, d).into_iter().rev().collect())
        }
        fn decrypt_with_secret_key(&self, k: &str, d: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            let reversed: Vec<u8> = d.iter().rev().copied().collect();
            Ok(xor(k, &reversed))
        }
        fn create_signature(&self, k: &str, d: &[u8]) -> std::result::Result<Vec<u8>, CryptoError> {
            Ok(Hash::from_bytes(&[k.as_bytes(), d].concat()).0.to_vec())
        }
        fn verify_signature(&self, k: &str, d: &[u8], s: &[u8]) -> bool {
            Hash::from_bytes(&[k.as_bytes(), d].concat()).0.as_slice() == s
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Trade {
        book: String,
        notional: i64,
    }

    fn trade() -> Trade {
        Trade {
            book: "RATES-SYD".into(),
            notional: 10_000_000,
        }
    }

    struct Fixture {
        crypto: Arc<dyn CryptoProvider>,
        clock: ManualClock,
        info: ClientInfo,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                crypto: Arc::new(XorCrypto),
                clock: ManualClock::new(Timestamp(1_000_000_000)),
                info: ClientInfo::default(),
            }
        }

        fn ctx(&self) -> FreezeContext<'_> {
            FreezeContext {
                crypto: &self.crypto,
                clock: &self.clock,
                client_info: &self.info,
                default_format: SerialFormat::Undefined,
            }
        }
    }

    static SERIALIZE_CALLS: AtomicUsize = AtomicUsize::new(0);

    struct Counted(u32);

    impl Serialize for Counted {
        fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
            SERIALIZE_CALLS.fetch_add(1, Ordering::SeqCst);
            s.serialize_u32(self.0)
        }
    }

    #[test]
    fn test_freeze_is_idempotent() {
        let fx = Fixture::new();
        let mut item = Item::with_object("counted", Counted(7));
        item.freeze(&fx.ctx()).unwrap();
        let first = item.payload().unwrap().to_vec();
        let calls = SERIALIZE_CALLS.load(Ordering::SeqCst);

        fx.clock.advance(Duration::from_secs(5));
        item.freeze(&fx.ctx()).unwrap();
        assert_eq!(item.payload().unwrap(), first.as_slice());
        assert_eq!(SERIALIZE_CALLS.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_setters_rejected_after_freeze() {
        let fx = Fixture::new();
        let mut item = Item::with_object("trade", trade());
        item.freeze(&fx.ctx()).unwrap();

        let results = vec![
            item.set_name("other"),
            item.set_kind(ItemKind::Debug),
            item.set_app_scope("Other"),
            item.set_data_type("Other"),
            item.set_transient(true),
            item.set_net_scope(Some("net".into())),
            item.set_app_prop("k", 1),
            item.set_app_props(PropertySet::new()),
            item.set_sys_prop("k", 1),
            item.set_expires(Timestamp::MAX),
            item.set_lifetime(Duration::from_secs(1)),
            item.set_serial_format(SerialFormat::Json),
            item.set_transport_key_id(None),
            item.set_recipient_key_id(None),
            item.set_signer_key_id(None),
            item.set_object(trade()),
            item.set_text(None),
        ];
        for result in results {
            assert!(matches!(result, Err(ClientError::AlreadyFrozen)));
        }
    }

    #[test]
    fn test_freeze_requires_name() {
        let fx = Fixture::new();
        let mut item = Item::with_object("", trade());
        assert!(matches!(item.freeze(&fx.ctx()), Err(ClientError::MissingName)));
        assert!(!item.is_frozen());
    }

    #[test]
    fn test_lifetime_becomes_expiry() {
        let fx = Fixture::new();
        let mut item = Item::builder("Foo")
            .object(trade())
            .lifetime(Duration::from_secs(10))
            .build();
        item.freeze(&fx.ctx()).unwrap();
        assert_eq!(item.created(), fx.clock.now());
        assert_eq!(item.expires(), fx.clock.now().saturating_add(Duration::from_secs(10)));
        assert!(item.is_current(fx.clock.now()));
        assert!(!item.is_current(item.expires()));
    }

    #[test]
    fn test_default_lifetime_clamps_to_max() {
        let fx = Fixture::new();
        let mut item = Item::with_object("forever", trade());
        item.freeze(&fx.ctx()).unwrap();
        assert_eq!(item.expires(), Timestamp::MAX);
    }

    #[test]
    fn test_expiry_before_creation_raised() {
        let fx = Fixture::new();
        let mut item = Item::builder("late").expires(Timestamp(5)).build();
        item.freeze(&fx.ctx()).unwrap();
        assert_eq!(item.expires(), item.created());
    }

    #[test]
    fn test_full_pipeline_roundtrip_through_wire() {
        let fx = Fixture::new();
        let mut item = Item::builder("secret")
            .object(trade())
            .transport_key("tk-1")
            .recipient_key("rk-1")
            .signer_key("sk-1")
            .build();
        item.freeze(&fx.ctx()).unwrap();

        let sys = item.sys_props();
        assert_eq!(sys.get_i64(props::SERIAL_FORMAT), Some(SerialFormat::Schema.code()));
        assert_eq!(sys.get_i64(props::TRANSPORT_ALGORITHM), Some(1));
        assert_eq!(sys.get_i64(props::PAYLOAD_ALGORITHM), Some(1));
        assert_eq!(sys.get_str(props::NODE_ID), Some(fx.info.node_id.to_string().as_str()));
        assert_eq!(item.payload_hash(), Some(Hash::from_bytes(item.payload().unwrap())));

        let received = Item::from_wire(item.to_wire().unwrap(), Arc::clone(&fx.crypto));
        assert!(received.is_frozen());
        assert!(received.is_secret());
        assert!(received.is_signed());
        assert_eq!(*received.data::<Trade>().unwrap().unwrap(), trade());
    }

    #[test]
    fn test_tampered_signature_reads_unsigned() {
        let fx = Fixture::new();
        let mut item = Item::builder("signed").object(trade()).signer_key("sk-1").build();
        item.freeze(&fx.ctx()).unwrap();

        let mut wire = item.to_wire().unwrap();
        wire.signature[0] ^= 0xff;
        let received = Item::from_wire(wire, Arc::clone(&fx.crypto));
        assert!(!received.is_signed());
        // Payload still readable.
        assert_eq!(*received.data::<Trade>().unwrap().unwrap(), trade());
    }

    #[test]
    fn test_tombstone_roundtrip() {
        let fx = Fixture::new();
        let mut item = Item::with_text("gone", None, "Trade");
        item.freeze(&fx.ctx()).unwrap();
        let received = Item::from_wire(item.to_wire().unwrap(), Arc::clone(&fx.crypto));
        assert!(received.is_tombstone().unwrap());
        assert!(received.data::<Trade>().unwrap().is_none());
    }

    #[test]
    fn test_explicit_json_format_recorded() {
        let fx = Fixture::new();
        let mut item = Item::builder("json")
            .object(trade())
            .serial_format(SerialFormat::Json)
            .build();
        item.freeze(&fx.ctx()).unwrap();
        assert_eq!(item.serial_format(), SerialFormat::Json);

        let received = Item::from_wire(item.to_wire().unwrap(), Arc::clone(&fx.crypto));
        assert_eq!(received.serial_format(), SerialFormat::Json);
        let value = received.data::<serde_json::Value>().unwrap().unwrap();
        assert_eq!(value["book"], "RATES-SYD");
    }

    #[test]
    fn test_local_data_returns_original_value() {
        let item = Item::with_object("local", trade());
        let first = item.data::<Trade>().unwrap().unwrap();
        let second = item.data::<Trade>().unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_to_wire_requires_freeze() {
        let item = Item::with_object("unfrozen", trade());
        assert!(item.to_wire().is_err());
    }
}
