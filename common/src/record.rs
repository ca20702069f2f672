use std::borrow::Cow;

use serde::{Serialize, Serializer};

/// Application-level identifier of a connecting peer.
pub type ClientId = u16;

/// Numeric user id as reported by the kernel.
pub type Uid = u32;

/// Numeric group id as reported by the kernel.
pub type Gid = u32;

/// Client id of the routing authority; also the value of an unassigned client.
pub const ROUTING_CLIENT: ClientId = 0x0000;

/// User id used when no verified kernel credential is available.
pub const ANY_UID: Uid = 0xFFFF_FFFF;

/// Group id used when no verified kernel credential is available.
pub const ANY_GID: Gid = 0xFFFF_FFFF;

/// Longest host name the one-byte length prefix can describe.
pub const MAX_HOST_NAME_LEN: usize = u8::MAX as usize;

/// User and group id taken together from one kernel credential structure.
///
/// The pair is either fully known or fully [`KernelIdentity::UNKNOWN`]; there is
/// no way to set one id without the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct KernelIdentity {
    user_id:  Uid,
    group_id: Gid,
}

impl KernelIdentity {
    /// Identity used when the kernel credential was absent or failed validation.
    pub const UNKNOWN: Self = Self {
        user_id:  ANY_UID,
        group_id: ANY_GID,
    };

    /// Creates an identity from a user and group id pair
    pub const fn new(user_id: Uid, group_id: Gid) -> Self {
        Self { user_id, group_id }
    }

    /// The kernel-reported user id
    pub fn user_id(&self) -> Uid {
        self.user_id
    }

    /// The kernel-reported group id
    pub fn group_id(&self) -> Gid {
        self.group_id
    }

    /// Whether both ids differ from their sentinels
    pub fn is_known(&self) -> bool {
        self.user_id != ANY_UID && self.group_id != ANY_GID
    }
}

impl Default for KernelIdentity {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// The result of one successful receive on the credential channel.
///
/// `client_id` and `host_name` are declared by the peer. `user_id` and
/// `group_id` come from the kernel, or are [`ANY_UID`]/[`ANY_GID`] when no
/// credential could be validated. Callers must treat the sentinels as
/// untrusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRecord {
    client_id: ClientId,
    #[serde(flatten)]
    identity:  KernelIdentity,
    #[serde(serialize_with = "serialize_host_name")]
    host_name: Vec<u8>,
}

impl CredentialRecord {
    pub(crate) fn new(client_id: ClientId, identity: KernelIdentity, host_name: Vec<u8>) -> Self {
        debug_assert!(host_name.len() <= MAX_HOST_NAME_LEN);
        Self {
            client_id,
            identity,
            host_name,
        }
    }

    /// The client id declared by the peer
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// The kernel-verified user id, or [`ANY_UID`]
    pub fn user_id(&self) -> Uid {
        self.identity.user_id
    }

    /// The kernel-verified group id, or [`ANY_GID`]
    pub fn group_id(&self) -> Gid {
        self.identity.group_id
    }

    /// The user and group id as one value
    pub fn kernel_identity(&self) -> KernelIdentity {
        self.identity
    }

    /// Whether the record carries a validated kernel credential
    pub fn has_kernel_identity(&self) -> bool {
        self.identity.is_known()
    }

    /// The raw host name bytes declared by the peer
    pub fn host_name(&self) -> &[u8] {
        &self.host_name
    }

    /// The host name with invalid UTF-8 replaced
    pub fn host_name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.host_name)
    }

    /// Consumes the record and returns the host name buffer
    pub fn into_host_name(self) -> Vec<u8> {
        self.host_name
    }
}

fn serialize_host_name<S: Serializer>(host_name: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(host_name))
}
