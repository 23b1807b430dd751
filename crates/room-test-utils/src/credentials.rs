//! Sealed connection credentials for tests.
//!
//! Builds the same frame the host platform hands to clients:
//!
//! ```text
//! [iv_len: u8][iv][aad_len: u16 LE][aad][ct_len: u32 LE][ciphertext][tag: 16]
//! ```
//!
//! sealed with AES-256-GCM under `SHA-256(secret)` and base64url encoded
//! without padding.

use crate::fixtures::TestParticipant;
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aes::Aes256;
use aes_gcm::{AeadInPlace, AesGcm, KeyInit};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::digest::{digest, SHA256};
use serde_json::{Map, Value};

/// Secret used when a test does not pick one.
pub const TEST_CLIENT_SECRET: &str = "test-client-secret";

/// Builder for a sealed credential.
#[derive(Debug, Clone)]
pub struct TestCredential {
    secret: String,
    iv: Vec<u8>,
    aad: Vec<u8>,
    fields: Map<String, Value>,
}

impl TestCredential {
    /// Credential carrying `mid` and `uid`.
    #[must_use]
    pub fn new(room_id: &str, participant_id: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("mid".to_string(), Value::from(room_id));
        fields.insert("uid".to_string(), Value::from(participant_id));
        Self {
            secret: TEST_CLIENT_SECRET.to_string(),
            iv: vec![0x5a; 12],
            aad: b"leave-vote".to_vec(),
            fields,
        }
    }

    /// Credential for a fixture participant.
    #[must_use]
    pub fn for_participant(participant: &TestParticipant) -> Self {
        Self::new(
            participant.room_id.as_str(),
            participant.participant_id.as_str(),
        )
    }

    #[must_use]
    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = secret.to_string();
        self
    }

    #[must_use]
    pub fn with_iv(mut self, iv: &[u8]) -> Self {
        self.iv = iv.to_vec();
        self
    }

    #[must_use]
    pub fn with_aad(mut self, aad: &[u8]) -> Self {
        self.aad = aad.to_vec();
        self
    }

    /// Add or replace a payload field.
    #[must_use]
    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Drop a payload field.
    #[must_use]
    pub fn without_field(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self
    }

    /// The raw frame before base64 encoding.
    ///
    /// # Panics
    ///
    /// Panics if the IV is neither 12 nor 16 bytes.
    #[must_use]
    pub fn frame(&self) -> Vec<u8> {
        let plaintext = serde_json::to_vec(&self.fields).expect("fields serialize");
        seal_frame(&self.secret, &self.iv, &self.aad, &plaintext)
    }

    /// The encoded token as the client would send it.
    #[must_use]
    pub fn seal(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.frame())
    }
}

/// Seal `plaintext` into a credential frame.
///
/// # Panics
///
/// Panics if the IV is neither 12 nor 16 bytes or a length overflows its prefix.
#[must_use]
pub fn seal_frame(secret: &str, iv: &[u8], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let hash = digest(&SHA256, secret.as_bytes());
    let mut ciphertext = plaintext.to_vec();

    let tag: Vec<u8> = match iv.len() {
        12 => {
            let key = LessSafeKey::new(
                UnboundKey::new(&AES_256_GCM, hash.as_ref()).expect("32-byte key"),
            );
            let nonce = Nonce::try_assume_unique_for_key(iv).expect("12-byte IV");
            key.seal_in_place_separate_tag(nonce, Aad::from(aad), &mut ciphertext)
                .expect("seal")
                .as_ref()
                .to_vec()
        }
        16 => AesGcm::<Aes256, U16>::new_from_slice(hash.as_ref())
            .expect("32-byte key")
            .encrypt_in_place_detached(GenericArray::from_slice(iv), aad, &mut ciphertext)
            .expect("seal")
            .to_vec(),
        other => panic!("no test sealer for a {other}-byte IV"),
    };

    let mut frame = vec![u8::try_from(iv.len()).expect("iv length fits u8")];
    frame.extend_from_slice(iv);
    frame.extend_from_slice(&u16::try_from(aad.len()).expect("aad length fits u16").to_le_bytes());
    frame.extend_from_slice(aad);
    frame.extend_from_slice(
        &u32::try_from(ciphertext.len())
            .expect("ciphertext length fits u32")
            .to_le_bytes(),
    );
    frame.extend_from_slice(&ciphertext);
    frame.extend_from_slice(&tag);
    frame
}
