//! Signing material resolution
//!
//! A `suri` is a secret URI as understood by Substrate keyrings: a BIP-39
//! mnemonic, a `0x`-prefixed 32-byte hex seed, or a dev derivation such as
//! `//Alice`, each optionally followed by `//hard` or `/soft` junctions and a
//! `///password`. Keys are sr25519 and the account id is the public key.

use crate::errors::{GatewayError, GatewayResult};
use crate::identifiers::AccountId;
use std::sync::Arc;
use subxt_signer::sr25519::Keypair;
use subxt_signer::SecretUri;

/// An account able to authorize calls
pub trait AccountSigner: Send + Sync {
    fn account(&self) -> AccountId;
    fn sign(&self, payload: &[u8]) -> [u8; 64];
}

/// Turns caller-supplied signing material into a signer
pub trait SigningMaterialResolver: Send + Sync {
    fn resolve(&self, suri: &str) -> GatewayResult<Arc<dyn AccountSigner>>;
}

pub struct Sr25519Signer {
    keypair: Keypair,
}

impl Sr25519Signer {
    pub fn from_suri(suri: &str) -> GatewayResult<Self> {
        let suri = suri.trim();
        if suri.is_empty() {
            return Err(GatewayError::validation("suri", "must not be empty"));
        }
        let uri: SecretUri = suri
            .parse()
            .map_err(|e| GatewayError::validation("suri", format!("invalid secret URI: {e}")))?;
        let keypair = Keypair::from_uri(&uri)
            .map_err(|e| GatewayError::validation("suri", format!("cannot derive key: {e}")))?;
        Ok(Self { keypair })
    }

    pub fn from_seed(seed: [u8; 32]) -> GatewayResult<Self> {
        Self::from_suri(&format!("0x{}", hex::encode(seed)))
    }
}

impl AccountSigner for Sr25519Signer {
    fn account(&self) -> AccountId {
        AccountId::new(self.keypair.public_key().0)
    }

    fn sign(&self, payload: &[u8]) -> [u8; 64] {
        self.keypair.sign(payload).0
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SuriResolver;

impl SigningMaterialResolver for SuriResolver {
    fn resolve(&self, suri: &str) -> GatewayResult<Arc<dyn AccountSigner>> {
        Ok(Arc::new(Sr25519Signer::from_suri(suri)?))
    }
}
