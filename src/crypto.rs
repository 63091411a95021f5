//! Cryptographic primitives for PoQChain
//!
//! One canonical hash function is used everywhere: SHA-256, hex-encoded.
//! Structured inputs go through [`crypto_hash`], whose field encoding is
//! frozen: each field is serialized with `serde_json`, the encodings are
//! joined with a single space in argument order, and the resulting string is
//! hashed. Block hash equality across nodes depends on this bit-for-bit.

use crate::error::ChainError;
use once_cell::sync::Lazy;
use rand::rngs::OsRng;
use secp256k1::{
    constants::{COMPACT_SIGNATURE_SIZE, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE},
    ecdsa::Signature,
    All, Message, PublicKey, Secp256k1, SecretKey,
};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A thread-safe, lazily initialized Secp256k1 context.
static SECP256K1_CONTEXT: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// An address is the hex encoding of a compressed secp256k1 public key, so a
/// signature can be checked against the address alone.
pub type Address = String;

/// SHA-256 of `data`, hex-encoded.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Canonical encoding of a single hash field.
pub fn hash_field<T: Serialize + ?Sized>(value: &T) -> Result<String, ChainError> {
    serde_json::to_string(value).map_err(|e| ChainError::SerializationError(e.to_string()))
}

/// Hash already-encoded fields in order.
pub fn crypto_hash(fields: &[String]) -> String {
    sha256_hex(fields.join(" "))
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generates a new random KeyPair using the OS random number generator.
    pub fn generate() -> Result<Self, ChainError> {
        let secret_key = SecretKey::new(&mut OsRng);
        Ok(Self::from_secret_key(secret_key))
    }

    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(&SECP256K1_CONTEXT, &secret_key);
        KeyPair {
            secret_key,
            public_key,
        }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret_key = SecretKey::from_slice(bytes).map_err(|e| {
            if bytes.len() != SECRET_KEY_SIZE {
                ChainError::CryptoError(format!(
                    "Secret key must be {} bytes, got {}",
                    SECRET_KEY_SIZE,
                    bytes.len()
                ))
            } else {
                ChainError::CryptoError(format!("Invalid secret key bytes: {}", e))
            }
        })?;

        Ok(Self::from_secret_key(secret_key))
    }

    /// The hex-encoded compressed public key.
    pub fn address(&self) -> Address {
        hex::encode(self.public_key.serialize())
    }

    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key.serialize()
    }

    /// Signs SHA-256(`message`) and returns the compact signature bytes.
    pub fn sign(&self, message: &[u8]) -> Result<[u8; COMPACT_SIGNATURE_SIZE], ChainError> {
        let digest = Sha256::digest(message);

        let message = Message::from_digest_slice(&digest)
            .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;

        let signature = SECP256K1_CONTEXT.sign_ecdsa(&message, &self.secret_key);
        Ok(signature.serialize_compact())
    }
}

/// Verifies an ECDSA signature given the raw public key bytes, message, and signature bytes.
pub fn verify_signature(
    public_key_bytes: &[u8],
    message: &[u8],
    signature_bytes: &[u8],
) -> Result<(), ChainError> {
    if public_key_bytes.len() != PUBLIC_KEY_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Public key must be exactly {} bytes (compressed), got {}",
            PUBLIC_KEY_SIZE,
            public_key_bytes.len()
        )));
    }
    if signature_bytes.len() != COMPACT_SIGNATURE_SIZE {
        return Err(ChainError::CryptoError(format!(
            "Signature must be exactly {} bytes (compact), got {}",
            COMPACT_SIGNATURE_SIZE,
            signature_bytes.len()
        )));
    }

    let public_key = PublicKey::from_slice(public_key_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid public key: {}", e)))?;

    let digest = Sha256::digest(message);
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| ChainError::CryptoError(format!("Failed to create message: {}", e)))?;

    let signature = Signature::from_compact(signature_bytes)
        .map_err(|e| ChainError::CryptoError(format!("Invalid signature: {}", e)))?;

    SECP256K1_CONTEXT
        .verify_ecdsa(&message, &signature, &public_key)
        .map_err(|_| ChainError::CryptoError("Signature verification failed".to_string()))
}

/// Verifies a hex signature against a hex address.
pub fn verify_address_signature(
    address: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), ChainError> {
    let public_key = hex::decode(address)
        .map_err(|e| ChainError::CryptoError(format!("Invalid hex address: {}", e)))?;
    let signature = hex::decode(signature_hex)
        .map_err(|e| ChainError::CryptoError(format!("Invalid hex signature: {}", e)))?;
    verify_signature(&public_key, message, &signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_compressed_public_key() {
        let keypair = KeyPair::generate().unwrap();
        let address = keypair.address();
        assert_eq!(address.len(), PUBLIC_KEY_SIZE * 2);
        assert_eq!(hex::decode(&address).unwrap(), keypair.public_key_bytes().to_vec());
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = KeyPair::generate().unwrap();
        let message = b"Hello, PoQChain!";

        let signature = keypair.sign(message).unwrap();
        assert!(verify_signature(&keypair.public_key_bytes(), message, &signature).is_ok());
        assert!(verify_address_signature(&keypair.address(), message, &hex::encode(signature)).is_ok());
    }

    #[test]
    fn test_invalid_signature() {
        let keypair1 = KeyPair::generate().unwrap();
        let keypair2 = KeyPair::generate().unwrap();

        let message = b"Test message";
        let signature = keypair1.sign(message).unwrap();

        let result = verify_signature(&keypair2.public_key_bytes(), message, &signature);
        assert_eq!(
            result.unwrap_err().to_string(),
            "Cryptographic error: Signature verification failed"
        );
    }

    #[test]
    fn test_tampered_message() {
        let keypair = KeyPair::generate().unwrap();
        let signature = keypair.sign(b"Original message").unwrap();

        let result = verify_signature(&keypair.public_key_bytes(), b"Tampered message", &signature);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_key_or_sig_length_check() {
        let keypair = KeyPair::generate().unwrap();
        let message = b"Test";
        let signature = keypair.sign(message).unwrap();
        let pubkey_bytes = keypair.public_key_bytes();

        let result = verify_signature(&pubkey_bytes[1..], message, &signature);
        assert!(result.unwrap_err().to_string().contains("Public key must be exactly"));

        let result = verify_signature(&pubkey_bytes, message, &signature[1..]);
        assert!(result.unwrap_err().to_string().contains("Signature must be exactly"));
    }

    #[test]
    fn test_from_secret_bytes_roundtrip() {
        let keypair = KeyPair::generate().unwrap();
        let restored = KeyPair::from_secret_bytes(&keypair.secret_key.secret_bytes()).unwrap();
        assert_eq!(keypair.address(), restored.address());

        let short_bytes = [0u8; SECRET_KEY_SIZE - 1];
        assert!(KeyPair::from_secret_bytes(&short_bytes)
            .unwrap_err()
            .to_string()
            .contains("Secret key must be"));
    }

    #[test]
    fn test_crypto_hash_is_order_sensitive() {
        let a = hash_field(&1u64).unwrap();
        let b = hash_field("x").unwrap();
        assert_eq!(crypto_hash(&[a.clone(), b.clone()]), crypto_hash(&[a.clone(), b.clone()]));
        assert_ne!(crypto_hash(&[a.clone(), b.clone()]), crypto_hash(&[b, a]));
    }

    #[test]
    fn test_sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
