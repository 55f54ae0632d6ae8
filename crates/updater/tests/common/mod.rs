//! Shared helpers for the HTTP-level tests.

#![allow(dead_code)]

use base64::{engine::general_purpose, Engine as _};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use sha2::Sha256;

pub const KEY_PATH: &str = "/--/manifest-public-key";
pub const MANIFEST_PATH: &str = "/manifest";

/// RSA key pair used to sign test manifests.
pub struct KeyPair {
    private: RsaPrivateKey,
    pub pem: String,
}

impl KeyPair {
    pub fn generate() -> Self {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("key generation");
        let pem = RsaPublicKey::from(&private)
            .to_public_key_pem(LineEnding::LF)
            .expect("PEM encoding");
        Self { private, pem }
    }

    pub fn sign(&self, plaintext: &str) -> String {
        let signing_key = SigningKey::<Sha256>::new(self.private.clone());
        general_purpose::STANDARD.encode(signing_key.sign(plaintext.as_bytes()).to_bytes())
    }

    /// Wrap `manifest` in a signed envelope the way the update server does.
    pub fn envelope(&self, manifest: &Value) -> Value {
        let manifest_string = manifest.to_string();
        json!({
            "signature": self.sign(&manifest_string),
            "manifestString": manifest_string,
        })
    }
}

pub fn manifest_body(id: &str, commit_time: &str, bundle_url: Option<String>) -> Value {
    let mut body = json!({
        "id": id,
        "commitTime": commit_time,
        "runtimeVersion": "1.0.0",
        "name": "demo-app",
    });
    if let Some(url) = bundle_url {
        body["bundleUrl"] = Value::String(url);
    }
    body
}
