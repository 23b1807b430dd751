//! Connection credential decoding.
//!
//! A credential is a base64url token (padding optional) wrapping an
//! AES-256-GCM sealed JSON object. The key is SHA-256 of the shared client
//! secret. Binary layout after decoding:
//!
//! ```text
//! [1 byte  iv length][iv]
//! [2 bytes LE aad length][aad]
//! [4 bytes LE ciphertext length][ciphertext]
//! [remaining bytes: 16-byte authentication tag]
//! ```
//!
//! The IV is usually 12 bytes. The GCM nonce derivation for other sizes is
//! supported for 8, 16, 24 and 32 byte IVs; anything else is refused with
//! [`CredentialError::UnsupportedIvLength`].
//!
//! The plaintext must be a flat object carrying non-empty string fields
//! `mid` (room) and `uid` (participant). Any failure rejects the whole
//! credential; there is no partial identity.
//!
//! # Security
//!
//! - Length is checked at every offset before slicing
//! - Tag mismatch yields [`CredentialError::DecryptionFailed`] and nothing else
//! - Tokens and secrets are never logged

use crate::errors::CredentialError;

use aes_gcm::aead::consts::{U16, U24, U32, U8};
use aes_gcm::aead::generic_array::{ArrayLength, GenericArray};
use aes_gcm::aes::Aes256;
use aes_gcm::{AeadInPlace, AesGcm, KeyInit};
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use common::secret::{ExposeSecret, SecretString};
use common::types::{ParticipantId, RoomId};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::digest::{digest, SHA256};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Maximum encoded token size accepted (8 KiB).
pub const MAX_CREDENTIAL_SIZE: usize = 8192;

/// Header carrying the credential.
pub const CREDENTIAL_HEADER: &str = "x-app-context";

/// Header name used by the host platform; read when [`CREDENTIAL_HEADER`] is absent.
pub const HOST_CREDENTIAL_HEADER: &str = "x-zoom-app-context";

/// Query parameter fallback when the header cannot be set (browser WebSocket).
pub const CREDENTIAL_QUERY_PARAM: &str = "app_context";

/// Host platform spelling of [`CREDENTIAL_QUERY_PARAM`].
pub const HOST_CREDENTIAL_QUERY_PARAM: &str = "zoom_context";

/// Query parameters read in bypass mode.
pub const BYPASS_ROOM_PARAM: &str = "roomId";
pub const BYPASS_PARTICIPANT_PARAM: &str = "pid";

const TAG_LEN: usize = 16;

/// iv length byte + aad length + ciphertext length.
const MIN_FRAME_LEN: usize = 1 + 2 + 4;

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A resolved connection identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub room_id: RoomId,
    pub participant_id: ParticipantId,
}

/// Bounds-checked reader over a decoded frame.
struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], CredentialError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(CredentialError::Truncated(field))?;
        let bytes = self
            .buf
            .get(self.pos..end)
            .ok_or(CredentialError::Truncated(field))?;
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(
        &mut self,
        field: &'static str,
    ) -> Result<[u8; N], CredentialError> {
        let bytes = self.take(N, field)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn rest(&self) -> &'a [u8] {
        self.buf.get(self.pos..).unwrap_or_default()
    }
}

/// Sealed credential fields, borrowed from the decoded frame.
struct Frame<'a> {
    iv: &'a [u8],
    aad: &'a [u8],
    ciphertext: &'a [u8],
    tag: &'a [u8],
}

fn parse_frame(bytes: &[u8]) -> Result<Frame<'_>, CredentialError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(CredentialError::Truncated("frame"));
    }

    let mut reader = FrameReader::new(bytes);

    let [iv_len] = reader.take_array::<1>("iv length")?;
    let iv = reader.take(usize::from(iv_len), "iv")?;

    let aad_len = u16::from_le_bytes(reader.take_array("aad length")?);
    let aad = reader.take(usize::from(aad_len), "aad")?;

    let ct_len = u32::from_le_bytes(reader.take_array("ciphertext length")?);
    let ct_len = usize::try_from(ct_len).map_err(|_| CredentialError::Truncated("ciphertext"))?;
    let ciphertext = reader.take(ct_len, "ciphertext")?;

    Ok(Frame {
        iv,
        aad,
        ciphertext,
        tag: reader.rest(),
    })
}

fn required_field(
    payload: &serde_json::Map<String, serde_json::Value>,
    name: &'static str,
) -> Result<String, CredentialError> {
    match payload.get(name).and_then(serde_json::Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(CredentialError::MissingField(name)),
    }
}

/// Open a detached-tag AES-256-GCM box whose nonce is `N` bytes.
fn open_with_nonce_size<N: ArrayLength<u8>>(
    block: &Aes256,
    frame: &Frame<'_>,
    buffer: &mut [u8],
) -> Result<(), CredentialError> {
    let nonce = GenericArray::<u8, N>::from_exact_iter(frame.iv.iter().copied())
        .ok_or(CredentialError::UnsupportedIvLength(frame.iv.len()))?;
    let tag = GenericArray::<u8, U16>::from_exact_iter(frame.tag.iter().copied())
        .ok_or(CredentialError::InvalidTagLength(frame.tag.len()))?;

    AesGcm::<Aes256, N>::from(block.clone())
        .decrypt_in_place_detached(&nonce, frame.aad, buffer, &tag)
        .map_err(|_| CredentialError::DecryptionFailed)
}

/// Decodes and authenticates credential tokens.
pub struct CredentialDecoder {
    /// 96-bit nonces.
    key: LessSafeKey,
    /// Other nonce sizes.
    block: Aes256,
}

impl fmt::Debug for CredentialDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialDecoder")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl CredentialDecoder {
    /// Derive the decryption key from the shared client secret.
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::DecryptionFailed` if the key cannot be built,
    /// which does not happen for a 32-byte SHA-256 digest.
    pub fn new(secret: &SecretString) -> Result<Self, CredentialError> {
        let hash = digest(&SHA256, secret.expose_secret().as_bytes());
        let unbound = UnboundKey::new(&AES_256_GCM, hash.as_ref())
            .map_err(|_| CredentialError::DecryptionFailed)?;
        let block =
            Aes256::new_from_slice(hash.as_ref()).map_err(|_| CredentialError::DecryptionFailed)?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            block,
        })
    }

    /// Decode a token into a [`Credential`].
    ///
    /// # Errors
    ///
    /// Returns the specific [`CredentialError`] for the first check that fails.
    pub fn decode(&self, token: &str) -> Result<Credential, CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Missing);
        }
        if token.len() > MAX_CREDENTIAL_SIZE {
            return Err(CredentialError::TooLarge(token.len()));
        }

        let bytes = URL_SAFE_LENIENT
            .decode(token)
            .map_err(|e| CredentialError::InvalidEncoding(e.to_string()))?;

        let frame = parse_frame(&bytes)?;

        if !matches!(frame.iv.len(), 8 | NONCE_LEN | 16 | 24 | 32) {
            return Err(CredentialError::UnsupportedIvLength(frame.iv.len()));
        }
        if frame.tag.len() != TAG_LEN {
            return Err(CredentialError::InvalidTagLength(frame.tag.len()));
        }

        let mut buffer = Vec::with_capacity(frame.ciphertext.len() + TAG_LEN);
        buffer.extend_from_slice(frame.ciphertext);
        self.open(&frame, &mut buffer)?;

        let payload: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(&buffer)
                .map_err(|e| CredentialError::InvalidPayload(e.to_string()))?;

        Ok(Credential {
            room_id: RoomId::new(required_field(&payload, "mid")?),
            participant_id: ParticipantId::new(required_field(&payload, "uid")?),
        })
    }

    /// Authenticate and decrypt `frame` in place.
    ///
    /// `buffer` holds the ciphertext on entry and the plaintext on success.
    fn open(&self, frame: &Frame<'_>, buffer: &mut Vec<u8>) -> Result<(), CredentialError> {
        match frame.iv.len() {
            NONCE_LEN => {
                let nonce = Nonce::try_assume_unique_for_key(frame.iv)
                    .map_err(|_| CredentialError::UnsupportedIvLength(frame.iv.len()))?;
                buffer.extend_from_slice(frame.tag);
                let plaintext_len = self
                    .key
                    .open_in_place(nonce, Aad::from(frame.aad), buffer)
                    .map_err(|_| CredentialError::DecryptionFailed)?
                    .len();
                buffer.truncate(plaintext_len);
                Ok(())
            }
            8 => open_with_nonce_size::<U8>(&self.block, frame, buffer),
            16 => open_with_nonce_size::<U16>(&self.block, frame, buffer),
            24 => open_with_nonce_size::<U24>(&self.block, frame, buffer),
            32 => open_with_nonce_size::<U32>(&self.block, frame, buffer),
            other => Err(CredentialError::UnsupportedIvLength(other)),
        }
    }
}

/// Resolves a connection identity from what the transport supplied.
#[derive(Debug)]
pub struct CredentialResolver {
    decoder: Option<CredentialDecoder>,
    dev_bypass: bool,
}

impl CredentialResolver {
    /// Resolver that requires a sealed credential.
    #[must_use]
    pub fn new(decoder: CredentialDecoder) -> Self {
        Self {
            decoder: Some(decoder),
            dev_bypass: false,
        }
    }

    /// Resolver that trusts plain `roomId`/`pid` query parameters.
    ///
    /// Development only; never the default.
    #[must_use]
    pub fn dev_bypass() -> Self {
        warn!(
            target: "room.credential",
            "Credential bypass is ACTIVE: identities are taken from query parameters unverified"
        );
        Self {
            decoder: None,
            dev_bypass: true,
        }
    }

    #[must_use]
    pub fn is_bypass(&self) -> bool {
        self.dev_bypass
    }

    /// Resolve an identity from the credential header or query parameters.
    ///
    /// The header wins over the query parameter when both are present.
    /// `query` is checked for [`CREDENTIAL_QUERY_PARAM`], then
    /// [`HOST_CREDENTIAL_QUERY_PARAM`].
    ///
    /// # Errors
    ///
    /// Returns a [`CredentialError`] describing why no identity was resolved.
    pub fn resolve(
        &self,
        header: Option<&str>,
        query: &HashMap<String, String>,
    ) -> Result<Credential, CredentialError> {
        if self.dev_bypass {
            let room = query.get(BYPASS_ROOM_PARAM).map(|v| v.trim()).unwrap_or_default();
            let participant = query
                .get(BYPASS_PARTICIPANT_PARAM)
                .map(|v| v.trim())
                .unwrap_or_default();
            if room.is_empty() {
                return Err(CredentialError::MissingField(BYPASS_ROOM_PARAM));
            }
            if participant.is_empty() {
                return Err(CredentialError::MissingField(BYPASS_PARTICIPANT_PARAM));
            }
            warn!(
                target: "room.credential",
                room_id = %room,
                "Admitting connection via credential bypass"
            );
            return Ok(Credential {
                room_id: RoomId::from(room),
                participant_id: ParticipantId::from(participant),
            });
        }

        let token = header
            .filter(|h| !h.trim().is_empty())
            .or_else(|| {
                [CREDENTIAL_QUERY_PARAM, HOST_CREDENTIAL_QUERY_PARAM]
                    .into_iter()
                    .find_map(|name| query.get(name).filter(|v| !v.trim().is_empty()))
                    .map(String::as_str)
            })
            .ok_or(CredentialError::Missing)?;

        match &self.decoder {
            Some(decoder) => decoder.decode(token),
            None => Err(CredentialError::DecryptionFailed),
        }
    }
}
