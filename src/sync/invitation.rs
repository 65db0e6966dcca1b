//! Zero-friction invitations: sealing a circle key to a recipient.
//!
//! An invitation carries the circle's encryption key sealed to the
//! recipient's X25519 public key: ephemeral key agreement, HKDF-SHA256
//! derivation, XChaCha20-Poly1305 sealing. Only the matching private key
//! opens the envelope; any other key fails authentication.
//!
//! Envelope layout (before base64): `[ephemeral_pub 32][nonce 24][ciphertext]`.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use curve25519_dalek::montgomery::MontgomeryPoint;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{ChoraError, Result};
use crate::types::Timestamp;

/// Current invitation file format version.
pub const INVITATION_VERSION: u32 = 1;

/// HKDF context string binding derived keys to this envelope format.
const KDF_INFO: &[u8] = b"chora.invitation.v1";

/// Nonce length for XChaCha20-Poly1305.
const NONCE_LEN: usize = 24;

/// An invitation envelope, as written to
/// `.chora/access/<circle_id>/<username>.enc`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Invitation {
    /// File format version.
    pub version: u32,
    /// Invited username.
    pub username: String,
    /// The circle being shared.
    pub circle_id: String,
    /// Sealed circle key, base64-encoded.
    pub encrypted_key_b64: String,
    /// When the invitation was created.
    pub created_at: Timestamp,
}

impl Invitation {
    /// The conventional path of this invitation under a root directory.
    pub fn path_under(&self, root: impl AsRef<Path>) -> PathBuf {
        invitation_path(root, &self.circle_id, &self.username)
    }

    /// Saves the invitation as JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Loads an invitation from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let invitation: Invitation = serde_json::from_slice(&bytes)?;
        if invitation.version != INVITATION_VERSION {
            return Err(ChoraError::crypto(format!(
                "unsupported invitation version {}",
                invitation.version
            )));
        }
        Ok(invitation)
    }
}

/// The conventional invitation path:
/// `<root>/.chora/access/<circle_id>/<username>.enc`.
pub fn invitation_path(
    root: impl AsRef<Path>,
    circle_id: &str,
    username: &str,
) -> PathBuf {
    root.as_ref()
        .join(".chora")
        .join("access")
        .join(circle_id)
        .join(format!("{}.enc", username))
}

/// Generates an X25519 keypair: `(secret, public)`.
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    let public = MontgomeryPoint::mul_base_clamped(secret).to_bytes();
    (secret, public)
}

fn derive_cipher_key(shared: &[u8; 32], eph_public: &[u8; 32], recipient_public: &[u8; 32]) -> Result<[u8; 32]> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(eph_public);
    salt[32..].copy_from_slice(recipient_public);

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut key = [0u8; 32];
    hk.expand(KDF_INFO, &mut key)
        .map_err(|_| ChoraError::crypto("key derivation failed"))?;
    Ok(key)
}

/// Seals a circle key to a recipient's public key.
pub fn create_invitation(
    circle_key: &[u8; 32],
    recipient_public: &[u8; 32],
    username: &str,
    circle_id: &str,
) -> Result<Invitation> {
    let mut eph_secret = [0u8; 32];
    OsRng.fill_bytes(&mut eph_secret);
    let eph_public = MontgomeryPoint::mul_base_clamped(eph_secret).to_bytes();

    let shared = MontgomeryPoint(*recipient_public)
        .mul_clamped(eph_secret)
        .to_bytes();
    if shared == [0u8; 32] {
        return Err(ChoraError::crypto("degenerate recipient public key"));
    }

    let cipher_key = derive_cipher_key(&shared, &eph_public, recipient_public)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&cipher_key));

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), circle_key.as_slice())
        .map_err(|_| ChoraError::crypto("sealing failed"))?;

    let mut envelope = Vec::with_capacity(32 + NONCE_LEN + ciphertext.len());
    envelope.extend_from_slice(&eph_public);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);

    Ok(Invitation {
        version: INVITATION_VERSION,
        username: username.to_string(),
        circle_id: circle_id.to_string(),
        encrypted_key_b64: BASE64.encode(envelope),
        created_at: Timestamp::now(),
    })
}

/// Opens an invitation with the recipient's private key, returning the
/// circle key.
///
/// # Errors
///
/// Decryption with any key other than the one matching the invitation's
/// recipient fails authentication.
pub fn accept_invitation(invitation: &Invitation, recipient_secret: &[u8; 32]) -> Result<[u8; 32]> {
    let envelope = BASE64
        .decode(&invitation.encrypted_key_b64)
        .map_err(|e| ChoraError::crypto(format!("bad envelope encoding: {}", e)))?;
    if envelope.len() < 32 + NONCE_LEN + 16 {
        return Err(ChoraError::crypto("envelope too short"));
    }

    let mut eph_public = [0u8; 32];
    eph_public.copy_from_slice(&envelope[..32]);
    let nonce = &envelope[32..32 + NONCE_LEN];
    let ciphertext = &envelope[32 + NONCE_LEN..];

    let shared = MontgomeryPoint(eph_public)
        .mul_clamped(*recipient_secret)
        .to_bytes();
    let recipient_public = MontgomeryPoint::mul_base_clamped(*recipient_secret).to_bytes();
    let cipher_key = derive_cipher_key(&shared, &eph_public, &recipient_public)?;
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&cipher_key));

    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| ChoraError::crypto("decryption failed: wrong key or tampered envelope"))?;

    plaintext
        .try_into()
        .map_err(|_| ChoraError::crypto("unexpected circle key length"))
}
