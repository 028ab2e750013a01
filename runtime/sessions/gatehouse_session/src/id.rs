use ring::rand::{SecureRandom, SystemRandom};
use std::str::FromStr;

/// The number of random bytes in a session identifier.
const ID_LENGTH: usize = 16;

#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
/// The identifier for a session.
///
/// 128 bits drawn from the operating system's secure random number generator,
/// rendered as 32 upper-case hexadecimal characters. The rendering is URL-safe,
/// so the identifier can travel both in a cookie and as a path parameter.
///
/// # Format stability
///
/// From an API perspective, a session id is an opaque sequence of bytes.
/// Do **not** depend on the specifics of the underlying representation.
pub struct SessionId([u8; ID_LENGTH]);

impl SessionId {
    /// Generate a new random identifier using the random number generator
    /// provided by the underlying operating system.
    pub fn random() -> Self {
        let mut bytes = [0u8; ID_LENGTH];
        // The system RNG only fails if the OS has no entropy source at all,
        // in which case nothing security-related can work.
        SystemRandom::new()
            .fill(&mut bytes)
            .unwrap_or_else(|_| panic!("The operating system failed to provide random bytes"));
        Self(bytes)
    }

    /// A short, non-reversible digest of the identifier.
    ///
    /// Use it in logs: the identifier itself is a bearer credential.
    pub fn fingerprint(&self) -> String {
        let digest = ring::digest::digest(&ring::digest::SHA256, &self.0);
        hex::encode(&digest.as_ref()[..4])
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionId").field(&self.fingerprint()).finish()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("`{raw}` is not a valid session identifier")]
/// The error returned when parsing a [`SessionId`] out of a string.
pub struct InvalidSessionId {
    /// The rejected input.
    pub raw: String,
}

impl FromStr for SessionId {
    type Err = InvalidSessionId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; ID_LENGTH];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| InvalidSessionId { raw: s.to_owned() })?;
        Ok(Self(bytes))
    }
}
