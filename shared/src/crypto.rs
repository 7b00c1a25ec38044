//! Session key agreement and payload encryption
//!
//! Both peers hold a P-256 key pair. Public halves travel as DER
//! SubjectPublicKeyInfo inside LOGREQ and SRVKEY packets. The raw ECDH
//! secret is hashed with SHA-256 into a 256-bit key which, together with a
//! server chosen IV, drives AES-256-CBC for every non-handshake payload.
//!
//! Long-term identity keys can be kept on disk as PKCS#8 PEM, optionally
//! wrapped with a passphrase. Session key pairs on the server side are always
//! ephemeral and never written out.

use std::fs;
use std::path::Path;

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use log::debug;
use p256::ecdh;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::proto::IV_LEN;

pub const KEY_SIZE: usize = 32;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// An EC key pair on the fixed curve
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh random key pair
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// DER encoding of the public half, ready for a packet field
    pub fn public_der(&self) -> Result<Vec<u8>, CryptoError> {
        public_key_to_wire(&self.public)
    }

    /// Runs ECDH against `peer` and returns the raw shared secret
    pub fn derive_shared_secret(&self, peer: &PublicKey) -> Result<Vec<u8>, CryptoError> {
        derive_shared_secret(&self.secret, peer)
    }

    /// Loads a private key written by [`KeyPair::store`]
    ///
    /// An encrypted key needs the passphrase it was stored with; a plain key
    /// ignores an empty passphrase.
    pub fn load(path: impl AsRef<Path>, passphrase: Option<&str>) -> Result<Self, CryptoError> {
        let pem = fs::read_to_string(path.as_ref())?;
        let encrypted = pem.contains("ENCRYPTED PRIVATE KEY");

        let secret = match passphrase.filter(|p| !p.is_empty()) {
            Some(pass) if encrypted => SecretKey::from_pkcs8_encrypted_pem(&pem, pass.as_bytes())
                .map_err(|e| CryptoError::PrivateKey(e.to_string()))?,
            None if encrypted => return Err(CryptoError::PassphraseRequired),
            _ => SecretKey::from_pkcs8_pem(&pem)
                .map_err(|e| CryptoError::PrivateKey(e.to_string()))?,
        };

        debug!("Loaded private key from {}", path.as_ref().display());
        let public = secret.public_key();
        Ok(Self { secret, public })
    }

    /// Writes the private key as PKCS#8 PEM, encrypted when a passphrase is given
    pub fn store(&self, path: impl AsRef<Path>, passphrase: Option<&str>) -> Result<(), CryptoError> {
        let pem = match passphrase.filter(|p| !p.is_empty()) {
            Some(pass) => self
                .secret
                .to_pkcs8_encrypted_pem(&mut OsRng, pass.as_bytes(), LineEnding::LF),
            None => self.secret.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| CryptoError::PrivateKey(e.to_string()))?;

        fs::write(path.as_ref(), pem.as_bytes())?;
        debug!("Stored private key to {}", path.as_ref().display());
        Ok(())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").finish_non_exhaustive()
    }
}

pub fn public_key_to_wire(key: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    key.to_public_key_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::Encode(e.to_string()))
}

/// Decodes a DER public key received from the network
///
/// Malformed or off-curve input is reported as an error, never a panic.
pub fn wire_to_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_public_key_der(bytes).map_err(|e| CryptoError::PublicKey(e.to_string()))
}

pub fn derive_shared_secret(own: &SecretKey, peer: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let shared = ecdh::diffie_hellman(own.to_nonzero_scalar(), peer.as_affine());
    let secret = shared.raw_secret_bytes().to_vec();
    if secret.iter().all(|&b| b == 0) {
        return Err(CryptoError::Derive("degenerate shared secret".to_string()));
    }
    Ok(secret)
}

/// SHA-256 over arbitrary input
pub fn digest(bytes: &[u8]) -> [u8; KEY_SIZE] {
    Sha256::digest(bytes).into()
}

pub fn random_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// Symmetric key and IV for one connection
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionCipher {
    key: [u8; KEY_SIZE],
    iv: [u8; IV_LEN],
}

impl SessionCipher {
    pub fn new(key: [u8; KEY_SIZE], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    /// Hashes a raw ECDH secret into the session key
    pub fn from_shared_secret(secret: &[u8], iv: [u8; IV_LEN]) -> Self {
        Self::new(digest(secret), iv)
    }

    /// Derives the session for `own` talking to the DER encoded `peer_der`
    pub fn establish(own: &KeyPair, peer_der: &[u8], iv: [u8; IV_LEN]) -> Result<Self, CryptoError> {
        let peer = wire_to_public_key(peer_der)?;
        let mut secret = own.derive_shared_secret(&peer)?;
        let session = Self::from_shared_secret(&secret, iv);
        secret.zeroize();
        Ok(session)
    }

    pub fn iv(&self) -> [u8; IV_LEN] {
        self.iv
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &self.iv)
            .map_err(|e| CryptoError::KeyMaterial(e.to_string()))?;
        Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = Aes256CbcDec::new_from_slices(&self.key, &self.iv)
            .map_err(|e| CryptoError::KeyMaterial(e.to_string()))?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Decrypt)
    }
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher").finish_non_exhaustive()
    }
}
