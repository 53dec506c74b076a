//! Faucet signing identity: one secp256k1 key and the address derived from it.

use crate::error::{FaucetError, FaucetResult};
use drip_common::types::Address;
use k256::ecdsa::{RecoveryId, Signature, SigningKey};

/// Recoverable signature split into the parts a legacy transaction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

/// Holds the dispensing key. Immutable after construction.
pub struct SigningIdentity {
    signing_key: SigningKey,
    address: Address,
}

impl SigningIdentity {
    /// Parse a hex private key, with or without `0x`.
    pub fn from_hex(private_key: &str) -> FaucetResult<Self> {
        let private_key_hex = private_key.strip_prefix("0x").unwrap_or(private_key);
        let private_key_bytes = hex::decode(private_key_hex)
            .map_err(|e| FaucetError::ConfigError(format!("Invalid private key: {}", e)))?;

        if private_key_bytes.len() != 32 {
            return Err(FaucetError::ConfigError(format!(
                "Invalid private key length: {} bytes",
                private_key_bytes.len()
            )));
        }

        let signing_key = SigningKey::from_slice(&private_key_bytes)
            .map_err(|e| FaucetError::ConfigError(format!("Invalid signing key: {}", e)))?;

        Ok(Self::from_signing_key(signing_key))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = derive_address(&signing_key);
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a 32-byte keccak digest. `s` is normalized to the low half of
    /// the curve order and the recovery id adjusted accordingly.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> FaucetResult<RecoverableSignature> {
        let (signature, recovery_id): (Signature, RecoveryId) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| FaucetError::TransactionFailed(format!("Signing failed: {}", e)))?;

        let r: [u8; 32] = signature.r().to_bytes().into();
        let s: [u8; 32] = signature.s().to_bytes().into();

        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

fn derive_address(signing_key: &SigningKey) -> Address {
    let public_key = signing_key.verifying_key();
    let pub_key_bytes = public_key.to_encoded_point(false);
    let hash = keccak_hash::keccak(&pub_key_bytes.as_bytes()[1..]); // Skip the 0x04 prefix
    let mut addr_bytes = [0u8; 20];
    addr_bytes.copy_from_slice(&hash.0[12..]);
    Address(addr_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::VerifyingKey;

    // Well-known development key (hardhat/anvil account #0)
    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_address_derivation() {
        let identity = SigningIdentity::from_hex(DEV_KEY).unwrap();
        assert_eq!(
            identity.address().to_string(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_rejects_malformed_keys() {
        assert!(SigningIdentity::from_hex("0x1234").is_err());
        assert!(SigningIdentity::from_hex("not-hex").is_err());
        assert!(SigningIdentity::from_hex(&format!("0x{}", "00".repeat(32))).is_err());
    }

    #[test]
    fn test_signature_recovers_signer() {
        let identity = SigningIdentity::from_hex(DEV_KEY).unwrap();
        let digest = keccak_hash::keccak(b"drip").0;
        let sig = identity.sign_digest(&digest).unwrap();

        let mut rs = [0u8; 64];
        rs[..32].copy_from_slice(&sig.r);
        rs[32..].copy_from_slice(&sig.s);
        let signature = Signature::from_slice(&rs).unwrap();
        let recovery_id = RecoveryId::from_byte(sig.recovery_id).unwrap();

        let recovered = VerifyingKey::recover_from_prehash(&digest, &signature, recovery_id).unwrap();
        assert_eq!(&recovered, identity.signing_key.verifying_key());
    }
}
