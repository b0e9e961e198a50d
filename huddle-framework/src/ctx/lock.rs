use base64::{
    alphabet,
    engine::{GeneralPurpose, GeneralPurposeConfig},
    Engine,
};
use chrono::Utc;
use digest::Digest;
use sha2::Sha256;

use crate::{
    channel::ChannelError,
    model::Permissions,
    net::{join_name, NamespaceError},
    Context,
};

/// Encoder producing name-safe suffixes for claimed names
const SUFFIX_ENCODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_encode_padding(false),
);

impl Context {
    /// Claim a fresh name directly beneath `path` that only the local participant may administer,
    /// mount on, or create beneath. Every candidate that the namespace refuses or does not answer
    /// for within [call_timeout](crate::ChannelConfig::call_timeout) is discarded and a new one is
    /// tried, up to [lock_attempts](crate::ChannelConfig::lock_attempts) times.
    ///
    /// `candidate` holds the name whose claim is in flight, and the claimed name once this returns
    /// successfully, so that a caller that is cancelled part way through knows what to release
    pub(crate) async fn acquire_locked_name(
        &self,
        path: &str,
        candidate: &mut Option<String>,
    ) -> Result<String, ChannelError> {
        let perms = Permissions::locked(self.principal.default_patterns());
        let user = self.user_name();

        for attempt in 1..=self.cfg.lock_attempts {
            let name = join_name(path, &lock_suffix(&user));
            *candidate = Some(name.clone());

            let claim = self.namespace.set_permissions(&name, perms.clone());
            let claimed = tokio::time::timeout(self.cfg.call_timeout, claim)
                .await
                .unwrap_or(Err(NamespaceError::Timeout));

            match claimed {
                Ok(()) => {
                    log::trace!("Claimed {} after {} attempt(s)", name, attempt);
                    return Ok(name);
                }
                Err(e) => {
                    *candidate = None;
                    log::debug!("Failed to claim {} on attempt {}: {}", name, attempt, e)
                }
            }
        }

        Err(ChannelError::LockAllocationExhausted {
            attempts: self.cfg.lock_attempts,
        })
    }

    /// Delete a claimed name and everything beneath it
    pub(crate) async fn release_locked_name(&self, name: &str) -> Result<(), NamespaceError> {
        tokio::time::timeout(self.cfg.call_timeout, self.namespace.delete(name, true))
            .await
            .unwrap_or(Err(NamespaceError::Timeout))
    }
}

/// Create a random-looking suffix from the user's name and the current time, falling back to a
/// random salt if the clock cannot be represented in nanoseconds
fn lock_suffix(user: &str) -> String {
    let salt = Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(rand::random::<i64>);

    let digest = Sha256::digest(format!("{}-{}", user, salt).as_bytes());
    SUFFIX_ENCODER.encode(digest)
}
