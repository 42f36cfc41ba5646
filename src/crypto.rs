use core::fmt;

use md5::{Digest, Md5};
use zeroize::Zeroize;

use crate::types::AuthType;

/// Length of IPMI v1.5 user names, passwords and auth codes.
pub(crate) const KEY_LEN: usize = 16;

/// A minimal secret container that zeroizes its contents on drop.
///
/// This is intentionally small and avoids exposing secrets via `Debug`.
#[derive(Clone, Default)]
pub(crate) struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn to_key(&self) -> [u8; KEY_LEN] {
        pad_key(self.expose())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Truncate or zero-pad a user name or password to the fixed 16-byte field.
pub(crate) fn pad_key(secret: &[u8]) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    let n = secret.len().min(out.len());
    out[..n].copy_from_slice(&secret[..n]);
    out
}

/// Compute the session-header auth code for an outgoing message.
///
/// Returns `None` for [`AuthType::None`], which carries no auth code field.
pub(crate) fn auth_code(
    auth: AuthType,
    password: &SecretBytes,
    session_id: u32,
    session_seq: u32,
    message: &[u8],
) -> Option<[u8; KEY_LEN]> {
    match auth {
        AuthType::None => None,
        AuthType::Password => Some(password.to_key()),
        AuthType::Md5 => {
            let mut key = password.to_key();
            let mut hasher = Md5::new();
            hasher.update(key);
            hasher.update(session_id.to_le_bytes());
            hasher.update(message);
            hasher.update(session_seq.to_le_bytes());
            hasher.update(key);
            key.zeroize();
            let digest = hasher.finalize();
            let mut out = [0u8; KEY_LEN];
            out.copy_from_slice(&digest);
            Some(out)
        }
    }
}
