//! Names of the system properties written by `Item::freeze`.

/// Serial format code actually used.
pub const SERIAL_FORMAT: &str = "SAlg";
/// Serialized text length.
pub const TEXT_LENGTH: &str = "TLen";
/// Compression algorithm id.
pub const COMPRESSION_ALGORITHM: &str = "ZAlg";
/// Compressed buffer length.
pub const COMPRESSED_LENGTH: &str = "ZLen";
/// Symmetric encryption algorithm id.
pub const TRANSPORT_ALGORITHM: &str = "XAlg";
/// Symmetrically encrypted buffer length.
pub const TRANSPORT_LENGTH: &str = "XLen";
/// Asymmetric encryption / signature algorithm id.
pub const PAYLOAD_ALGORITHM: &str = "YAlg";
/// Final payload length.
pub const PAYLOAD_LENGTH: &str = "YLen";

pub const TRANSPORT_KEY_ID: &str = "Xtki";
pub const RECIPIENT_KEY_ID: &str = "Yrki";
pub const SIGNER_KEY_ID: &str = "Yski";

pub const APPL_NAME: &str = "ApplName";
pub const APPL_VERSION: &str = "ApplFVer";
pub const CORE_VERSION: &str = "CoreFVer";
pub const HOST_NAME: &str = "HostName";
pub const USER_NAME: &str = "UserName";
pub const USER_IDENTITY: &str = "UserIdentity";
pub const ENVIRONMENT: &str = "OrgEnvId";
pub const NODE_ID: &str = "NodeGuid";
