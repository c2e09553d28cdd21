//! Off-line signer producing allowlist authorizations for the Aviary drop.
//!
//! The chain accepts an allowlist mint when the caller presents a
//! recoverable secp256k1 signature over their own wallet digest, produced
//! by the key the administrator has installed on chain. This crate is the
//! producing side of that contract: it never talks to the chain, it only
//! turns `(secret key, wallet address)` pairs into signatures which are
//! handed to wallet holders out of band.
//!
//! The digest rule is a fixed wire format shared with the runtime: the
//! keccak-256 hash of the 32-byte account id, wrapped in the Ethereum
//! `personal_sign` envelope and hashed again. Change it on either side and
//! every outstanding authorization dies.

use blake2::Blake2b512;
use sha3::{Digest, Keccak256};
use thiserror::Error;

const SS58_PREFIX: &[u8] = b"SS58PRE";
const PERSONAL_SIGN_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid secret key: {0}")]
    BadSecretKey(String),
    #[error("invalid SS58 address: {0}")]
    BadAddress(String),
    #[error("SS58 checksum mismatch")]
    BadChecksum,
}

/// A signing key for allowlist authorizations.
pub struct AllowlistSigner {
    secret: libsecp256k1::SecretKey,
}

impl AllowlistSigner {
    /// Load a signer from a 32-byte hex-encoded secret key, with or without
    /// a `0x` prefix.
    pub fn from_hex(key: &str) -> Result<Self, SignerError> {
        let raw = hex::decode(key.strip_prefix("0x").unwrap_or(key))
            .map_err(|e| SignerError::BadSecretKey(e.to_string()))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| SignerError::BadSecretKey("expected 32 bytes".into()))?;
        let secret = libsecp256k1::SecretKey::parse(&bytes)
            .map_err(|e| SignerError::BadSecretKey(format!("{e:?}")))?;
        Ok(Self { secret })
    }

    /// The 20-byte Ethereum-style address of this key. This is the value to
    /// install on chain via `set_allowlist_signer`.
    pub fn address(&self) -> [u8; 20] {
        let public = libsecp256k1::PublicKey::from_secret_key(&self.secret);
        let hash = Keccak256::digest(&public.serialize()[1..65]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash[12..]);
        out
    }

    /// `address()` rendered as 0x-prefixed hex.
    pub fn address_hex(&self) -> String {
        format!("0x{}", hex::encode(self.address()))
    }

    /// Authorize `account_id` for the allowlist stage.
    pub fn sign_wallet(&self, account_id: &[u8; 32]) -> [u8; 65] {
        self.sign_digest(wallet_digest(account_id))
    }

    /// Sign an externally computed digest.
    pub fn sign_digest(&self, digest: [u8; 32]) -> [u8; 65] {
        let (signature, recovery_id) =
            libsecp256k1::sign(&libsecp256k1::Message::parse(&digest), &self.secret);
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.serialize());
        out[64] = recovery_id.serialize();
        out
    }
}

/// The digest the runtime derives for a wallet and expects signatures over.
pub fn wallet_digest(account_id: &[u8; 32]) -> [u8; 32] {
    let seed: [u8; 32] = Keccak256::digest(account_id).into();
    let mut message = Vec::with_capacity(PERSONAL_SIGN_PREFIX.len() + seed.len());
    message.extend_from_slice(PERSONAL_SIGN_PREFIX);
    message.extend_from_slice(&seed);
    Keccak256::digest(&message).into()
}

/// Decode an SS58 address into its raw 32-byte account id, verifying the
/// embedded checksum. Accepts one- and two-byte network prefixes.
pub fn decode_ss58(address: &str) -> Result<[u8; 32], SignerError> {
    let data = bs58::decode(address)
        .into_vec()
        .map_err(|e| SignerError::BadAddress(e.to_string()))?;
    let prefix_len = match data.len() {
        35 => 1,
        36 => 2,
        n => return Err(SignerError::BadAddress(format!("unexpected payload length {n}"))),
    };
    let (body, checksum) = data.split_at(data.len() - 2);

    let mut hasher = Blake2b512::new();
    hasher.update(SS58_PREFIX);
    hasher.update(body);
    let expected = hasher.finalize();
    if checksum != &expected[0..2] {
        return Err(SignerError::BadChecksum);
    }

    let mut id = [0u8; 32];
    id.copy_from_slice(&body[prefix_len..]);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Alice of the well-known dev keyring.
    const ALICE_SS58: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
    const ALICE_HEX: &str = "d43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d";

    fn alice_raw() -> [u8; 32] {
        hex::decode(ALICE_HEX).unwrap().try_into().unwrap()
    }

    fn test_signer() -> AllowlistSigner {
        AllowlistSigner::from_hex(&"01".repeat(32)).unwrap()
    }

    #[test]
    fn decode_ss58_matches_known_account() {
        assert_eq!(decode_ss58(ALICE_SS58).unwrap(), alice_raw());
    }

    #[test]
    fn decode_ss58_rejects_tampered_address() {
        let mut tampered = ALICE_SS58.to_string();
        let replacement = if &tampered[10..11] == "z" { "x" } else { "z" };
        tampered.replace_range(10..11, replacement);
        assert!(decode_ss58(&tampered).is_err());
    }

    #[test]
    fn decode_ss58_rejects_wrong_length() {
        assert!(matches!(decode_ss58("5Grwva"), Err(SignerError::BadAddress(_))));
    }

    #[test]
    fn from_hex_accepts_prefixed_and_bare_keys() {
        let bare = test_signer();
        let prefixed = AllowlistSigner::from_hex(&format!("0x{}", "01".repeat(32))).unwrap();
        assert_eq!(bare.address(), prefixed.address());
    }

    #[test]
    fn from_hex_rejects_bad_keys() {
        assert!(AllowlistSigner::from_hex("beef").is_err());
        assert!(AllowlistSigner::from_hex(&"00".repeat(32)).is_err());
        assert!(AllowlistSigner::from_hex("not hex at all").is_err());
    }

    #[test]
    fn signature_recovers_to_the_signer_address() {
        let signer = test_signer();
        let signature = signer.sign_wallet(&alice_raw());

        let message = libsecp256k1::Message::parse(&wallet_digest(&alice_raw()));
        let sig = libsecp256k1::Signature::parse_standard(
            &signature[..64].try_into().unwrap(),
        )
        .unwrap();
        let recovery_id = libsecp256k1::RecoveryId::parse(signature[64]).unwrap();
        let public = libsecp256k1::recover(&message, &sig, &recovery_id).unwrap();

        let hash = Keccak256::digest(&public.serialize()[1..65]);
        assert_eq!(&hash[12..], signer.address());
    }

    #[test]
    fn distinct_wallets_get_distinct_digests() {
        let mut bob = alice_raw();
        bob[0] ^= 0xff;
        assert_ne!(wallet_digest(&alice_raw()), wallet_digest(&bob));
    }
}
