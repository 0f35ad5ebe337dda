//! Trusted channel for fingerprint scanners.
//!
//! Fingerprint verification has no cryptographic proof: the scanner reports
//! "user X matched" and the gateway logs it. The only control is who may make
//! that report. [`AccessGateway::verify_fingerprint`](crate::gateway::AccessGateway::verify_fingerprint)
//! therefore takes a [`TrustedScanner`], which can only be obtained from
//! [`ScannerChannel::authorize`] at the transport boundary.

use constant_time_eq::constant_time_eq;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Why a scanner was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScannerAuthError {
    /// The channel requires a device key and none was presented.
    #[error("Missing device key")]
    MissingKey,

    /// The presented key matches no configured device.
    #[error("Unknown device key")]
    UnknownKey,
}

/// How fingerprint scanners prove they are allowed to report matches.
#[derive(Clone)]
pub enum ScannerChannel {
    /// Callers must present one of these device keys.
    SharedKey(Vec<SecretString>),

    /// No key check; the deployment restricts the endpoint at the network level.
    NetworkRestricted,
}

impl std::fmt::Debug for ScannerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SharedKey(keys) => f
                .debug_tuple("SharedKey")
                .field(&format_args!("{} keys", keys.len()))
                .finish(),
            Self::NetworkRestricted => f.write_str("NetworkRestricted"),
        }
    }
}

impl ScannerChannel {
    /// Build a channel from configured device keys.
    ///
    /// Blank keys are ignored. With no keys left the channel is
    /// [`NetworkRestricted`](Self::NetworkRestricted) and a warning is logged.
    #[must_use]
    pub fn from_keys(keys: impl IntoIterator<Item = String>) -> Self {
        let keys: Vec<SecretString> = keys
            .into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(SecretString::from)
            .collect();

        if keys.is_empty() {
            tracing::warn!(
                "No fingerprint device keys configured; /fingerprint/verify must be network-restricted"
            );
            Self::NetworkRestricted
        } else {
            tracing::info!(devices = keys.len(), "Fingerprint scanner keys loaded");
            Self::SharedKey(keys)
        }
    }

    /// Whether callers must present a device key.
    #[must_use]
    pub const fn requires_key(&self) -> bool {
        matches!(self, Self::SharedKey(_))
    }

    /// Check a caller's device key and mint the capability.
    ///
    /// # Errors
    ///
    /// - `MissingKey`: the channel is keyed and `presented` is `None`
    /// - `UnknownKey`: `presented` matches no configured key
    pub fn authorize(&self, presented: Option<&str>) -> Result<TrustedScanner, ScannerAuthError> {
        match self {
            Self::NetworkRestricted => Ok(TrustedScanner { _private: () }),
            Self::SharedKey(keys) => {
                let presented = presented.ok_or(ScannerAuthError::MissingKey)?;
                // Every key is compared; no early exit.
                let matched = keys.iter().fold(false, |found, key| {
                    constant_time_eq(key.expose_secret().as_bytes(), presented.as_bytes()) | found
                });
                if matched {
                    Ok(TrustedScanner { _private: () })
                } else {
                    Err(ScannerAuthError::UnknownKey)
                }
            }
        }
    }
}

/// Proof that the caller came through an authorized scanner channel.
///
/// Only [`ScannerChannel::authorize`] can create one.
#[derive(Debug)]
pub struct TrustedScanner {
    _private: (),
}
