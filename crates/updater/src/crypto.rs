//! RSA-SHA256 verification of detached manifest signatures.
//!
//! The public key is published at a single well-known URL and may be rotated
//! by the server operator at any time. Verification therefore first tries the
//! locally cached copy of the key and, only if that copy fails to validate the
//! signature, fetches the key once more straight from the origin.

use crate::error::VerifyError;
use crate::fetcher::{CacheDirective, PublicKeySource};
use base64::{engine::general_purpose, Engine as _};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::signature::Verifier;
use rsa::RsaPublicKey;
use sha2::Sha256;
use std::sync::Arc;

/// The exact bytes that were signed together with their detached signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// Text whose UTF-8 bytes were signed.
    pub plaintext: String,
    /// Base64 encoded RSASSA-PKCS1-v1_5 signature.
    pub signature: String,
}

impl SignedPayload {
    pub fn new(plaintext: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            plaintext: plaintext.into(),
            signature: signature.into(),
        }
    }
}

/// Result of a verification request.
#[derive(Debug)]
pub enum VerificationOutcome {
    /// The signature matches the payload.
    Valid,
    /// Key and signature were well formed but do not match.
    Invalid,
    /// Verification could not be completed.
    Error {
        cause: VerifyError,
        /// Transport failures are worth retrying later; crypto failures are not.
        is_network_error: bool,
    },
}

impl VerificationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationOutcome::Valid)
    }

    fn network(cause: VerifyError) -> Self {
        VerificationOutcome::Error {
            cause,
            is_network_error: true,
        }
    }

    fn rejected(cause: VerifyError) -> Self {
        VerificationOutcome::Error {
            cause,
            is_network_error: false,
        }
    }
}

/// Position in the cache-then-network key retrieval sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Key served from the local cache.
    Cached,
    /// Key fetched from the origin after the cached copy failed.
    ForcedNetwork,
}

impl Attempt {
    pub fn directive(self) -> CacheDirective {
        match self {
            Attempt::Cached => CacheDirective::ForceCache,
            Attempt::ForcedNetwork => CacheDirective::ForceNetwork,
        }
    }

    /// The attempt to make after a verification failure, if any.
    pub fn retry(self) -> Option<Attempt> {
        match self {
            Attempt::Cached => Some(Attempt::ForcedNetwork),
            Attempt::ForcedNetwork => None,
        }
    }
}

/// Verifies manifest signatures against a rotating public key.
#[derive(Clone)]
pub struct SignatureVerifier {
    keys: Arc<dyn PublicKeySource>,
}

impl SignatureVerifier {
    pub fn new(keys: Arc<dyn PublicKeySource>) -> Self {
        Self { keys }
    }

    /// Verify `payload` against the published key.
    ///
    /// A transport failure while reading the cached key is reported right
    /// away; a key that fails to validate the signature triggers exactly one
    /// forced-network retry.
    pub async fn verify(&self, payload: SignedPayload) -> VerificationOutcome {
        let mut attempt = Attempt::Cached;
        loop {
            let key = match self.keys.download_public_key(attempt.directive()).await {
                Ok(key) => key,
                Err(err) => return VerificationOutcome::network(VerifyError::KeyFetch(err)),
            };

            let failure = match check_signature(&key, &payload) {
                Ok(()) => return VerificationOutcome::Valid,
                Err(err) => err,
            };

            match attempt.retry() {
                Some(next) => {
                    tracing::debug!(
                        "signature check against cached key failed ({}), refetching key",
                        failure
                    );
                    attempt = next;
                }
                None => {
                    tracing::warn!("manifest signature rejected: {}", failure);
                    return VerificationOutcome::rejected(failure);
                }
            }
        }
    }

    /// Verify `payload` against a caller-supplied key without any fetching.
    pub fn verify_with_pem(pem: &str, payload: &SignedPayload) -> VerificationOutcome {
        match check_signature(pem.as_bytes(), payload) {
            Ok(()) => VerificationOutcome::Valid,
            Err(VerifyError::Mismatch) => VerificationOutcome::Invalid,
            Err(err) => VerificationOutcome::rejected(err),
        }
    }
}

fn check_signature(key: &[u8], payload: &SignedPayload) -> Result<(), VerifyError> {
    let key = parse_public_key(key)?;
    let raw = general_purpose::STANDARD
        .decode(strip_whitespace(&payload.signature))
        .map_err(|err| VerifyError::MalformedSignature(err.to_string()))?;
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|err| VerifyError::MalformedSignature(err.to_string()))?;

    VerifyingKey::<Sha256>::new(key)
        .verify(payload.plaintext.as_bytes(), &signature)
        .map_err(|_| VerifyError::Mismatch)
}

/// Decode a PEM armoured X.509 `SubjectPublicKeyInfo` RSA key.
pub fn parse_public_key(pem: &[u8]) -> Result<RsaPublicKey, VerifyError> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| VerifyError::MalformedKey("key is not valid UTF-8".into()))?;
    let body = strip_key_armor(text);
    if body.is_empty() {
        return Err(VerifyError::MalformedKey("key is empty".into()));
    }

    let der = general_purpose::STANDARD
        .decode(body)
        .map_err(|err| VerifyError::MalformedKey(err.to_string()))?;
    RsaPublicKey::from_public_key_der(&der)
        .map_err(|err| VerifyError::MalformedKey(err.to_string()))
}

/// Drop the `-----BEGIN/END PUBLIC KEY-----` lines and all whitespace.
fn strip_key_armor(text: &str) -> String {
    let body: String = text
        .lines()
        .filter(|line| !line.contains("PUBLIC KEY-----"))
        .collect();
    strip_whitespace(&body)
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keys::KeyPair;
    use crate::error::FetchError;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Key source with separate cached and origin answers that records every request.
    struct ScriptedKeys {
        cached: std::result::Result<String, ()>,
        origin: std::result::Result<String, ()>,
        requests: Mutex<Vec<CacheDirective>>,
    }

    impl ScriptedKeys {
        fn new(
            cached: std::result::Result<&str, ()>,
            origin: std::result::Result<&str, ()>,
        ) -> Arc<Self> {
            Arc::new(Self {
                cached: cached.map(str::to_owned),
                origin: origin.map(str::to_owned),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CacheDirective> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PublicKeySource for ScriptedKeys {
        async fn download_public_key(
            &self,
            directive: CacheDirective,
        ) -> Result<Bytes, FetchError> {
            self.requests.lock().unwrap().push(directive);
            let answer = match directive {
                CacheDirective::ForceCache => &self.cached,
                CacheDirective::ForceNetwork => &self.origin,
            };
            match answer {
                Ok(pem) => Ok(Bytes::from(pem.clone())),
                Err(()) => Err(FetchError::Cache(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "offline",
                ))),
            }
        }
    }

    #[test]
    fn attempt_sequence_allows_a_single_retry() {
        assert_eq!(Attempt::Cached.retry(), Some(Attempt::ForcedNetwork));
        assert_eq!(Attempt::ForcedNetwork.retry(), None);
        assert_eq!(Attempt::Cached.directive(), CacheDirective::ForceCache);
        assert_eq!(Attempt::ForcedNetwork.directive(), CacheDirective::ForceNetwork);
    }

    #[tokio::test]
    async fn cached_key_validates_on_first_attempt() {
        let pair = KeyPair::generate();
        let keys = ScriptedKeys::new(Ok(pair.pem.as_str()), Ok(pair.pem.as_str()));
        let verifier = SignatureVerifier::new(keys.clone());

        let outcome = verifier
            .verify(SignedPayload::new("abc", pair.sign("abc")))
            .await;

        assert!(outcome.is_valid());
        assert_eq!(keys.requests(), vec![CacheDirective::ForceCache]);
    }

    #[tokio::test]
    async fn stale_cached_key_is_refreshed_once() {
        let current = KeyPair::generate();
        let stale = KeyPair::generate();
        let keys = ScriptedKeys::new(Ok(stale.pem.as_str()), Ok(current.pem.as_str()));
        let verifier = SignatureVerifier::new(keys.clone());

        let outcome = verifier
            .verify(SignedPayload::new("abc", current.sign("abc")))
            .await;

        assert!(outcome.is_valid());
        assert_eq!(
            keys.requests(),
            vec![CacheDirective::ForceCache, CacheDirective::ForceNetwork]
        );
    }

    #[tokio::test]
    async fn wrong_key_everywhere_is_a_non_network_error() {
        let signer = KeyPair::generate();
        let other = KeyPair::generate();
        let keys = ScriptedKeys::new(Ok(other.pem.as_str()), Ok(other.pem.as_str()));
        let verifier = SignatureVerifier::new(keys.clone());

        let outcome = verifier
            .verify(SignedPayload::new("abc", signer.sign("abc")))
            .await;

        match outcome {
            VerificationOutcome::Error {
                cause: VerifyError::Mismatch,
                is_network_error: false,
            } => {}
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(keys.requests().len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_on_cached_attempt_is_not_retried() {
        let pair = KeyPair::generate();
        let keys = ScriptedKeys::new(Err(()), Ok(pair.pem.as_str()));
        let verifier = SignatureVerifier::new(keys.clone());

        let outcome = verifier
            .verify(SignedPayload::new("abc", pair.sign("abc")))
            .await;

        assert!(matches!(
            outcome,
            VerificationOutcome::Error {
                cause: VerifyError::KeyFetch(_),
                is_network_error: true
            }
        ));
        assert_eq!(keys.requests(), vec![CacheDirective::ForceCache]);
    }

    #[tokio::test]
    async fn transport_failure_on_retry_is_a_network_error() {
        let pair = KeyPair::generate();
        let keys = ScriptedKeys::new(Ok(""), Err(()));
        let verifier = SignatureVerifier::new(keys.clone());

        let outcome = verifier
            .verify(SignedPayload::new("abc", pair.sign("abc")))
            .await;

        assert!(matches!(
            outcome,
            VerificationOutcome::Error {
                is_network_error: true,
                ..
            }
        ));
        assert_eq!(keys.requests().len(), 2);
    }

    #[tokio::test]
    async fn empty_cache_falls_through_to_origin() {
        let pair = KeyPair::generate();
        let keys = ScriptedKeys::new(Ok(""), Ok(pair.pem.as_str()));
        let verifier = SignatureVerifier::new(keys.clone());

        let outcome = verifier
            .verify(SignedPayload::new("", pair.sign("")))
            .await;

        assert!(outcome.is_valid());
        assert_eq!(keys.requests().len(), 2);
    }

    #[tokio::test]
    async fn malformed_key_is_rejected_after_retry() {
        let pair = KeyPair::generate();
        let garbage = "-----BEGIN PUBLIC KEY-----\nnot base64 at all\n-----END PUBLIC KEY-----\n";
        let keys = ScriptedKeys::new(Ok(garbage), Ok(garbage));
        let verifier = SignatureVerifier::new(keys);

        let outcome = verifier
            .verify(SignedPayload::new("abc", pair.sign("abc")))
            .await;

        assert!(matches!(
            outcome,
            VerificationOutcome::Error {
                cause: VerifyError::MalformedKey(_),
                is_network_error: false
            }
        ));
    }

    #[test]
    fn crlf_armored_keys_parse() {
        let pair = KeyPair::generate();
        let crlf = pair.pem.replace('\n', "\r\n");
        assert!(parse_public_key(crlf.as_bytes()).is_ok());
    }

    #[test]
    fn pinned_key_distinguishes_mismatch_from_errors() {
        let pair = KeyPair::generate();
        let payload = SignedPayload::new("abc", pair.sign("abc"));
        assert!(SignatureVerifier::verify_with_pem(&pair.pem, &payload).is_valid());

        let tampered = SignedPayload::new("abd", payload.signature.clone());
        assert!(matches!(
            SignatureVerifier::verify_with_pem(&pair.pem, &tampered),
            VerificationOutcome::Invalid
        ));

        assert!(matches!(
            SignatureVerifier::verify_with_pem("", &payload),
            VerificationOutcome::Error {
                cause: VerifyError::MalformedKey(_),
                is_network_error: false
            }
        ));
    }
}
