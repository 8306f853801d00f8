//! Consensus key material.
//!
//! Two signature schemes coexist in the protocol:
//!
//! - **BLS12-381** (blst min_pk: 48-byte G1 public keys, 96-byte G2
//!   signatures) for votes and their aggregates. All vote signatures over the
//!   same message aggregate into a single signature verified in one pairing.
//! - **Ed25519** for transport authentication of whole gossip blobs.
//!
//! Aggregated signatures MUST be verified against exactly the public keys
//! indicated by the accompanying bitset, in stable committee order.

use blst::min_pk as bls;
use blst::BLST_ERROR;
use std::fmt;

/// Domain separation tag for all consensus BLS signatures.
pub const BLS_DST: &[u8] = b"SBA-BLS-VOTE-v1";

/// A compressed BLS12-381 G1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlsPublicKey(pub [u8; 48]);

impl BlsPublicKey {
    pub const BYTES: usize = 48;

    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }

    /// Parse from raw compressed bytes.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is not exactly 48 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; 48];
        arr.copy_from_slice(bytes);
        Self(arr)
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPublicKey({}..)", hex::encode(&self.0[..6]))
    }
}

/// A compressed BLS12-381 G2 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlsSignature(pub [u8; 96]);

impl BlsSignature {
    pub const BYTES: usize = 96;

    /// Zero placeholder signature, only meaningful in tests and sentinels.
    pub fn zeroed() -> Self {
        Self([0u8; 96])
    }

    pub fn as_bytes(&self) -> &[u8; 96] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; 96];
        arr.copy_from_slice(bytes);
        Self(arr)
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature({}..)", hex::encode(&self.0[..6]))
    }
}

/// BLS secret key plus cached public key.
#[derive(Clone)]
pub struct BlsKeyPair {
    secret: bls::SecretKey,
    public: BlsPublicKey,
}

impl BlsKeyPair {
    /// Derive a keypair from a 32-byte seed via blst's key_gen.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let secret = bls::SecretKey::key_gen(seed, &[]).expect("key_gen accepts 32-byte seeds");
        let public = BlsPublicKey(secret.sk_to_pk().to_bytes());
        Self { secret, public }
    }

    /// Generate a random keypair.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut seed);
        Self::from_seed(&seed)
    }

    pub fn public_key(&self) -> BlsPublicKey {
        self.public
    }

    /// Sign a message under the protocol DST.
    pub fn sign(&self, msg: &[u8]) -> BlsSignature {
        BlsSignature(self.secret.sign(msg, BLS_DST, &[]).to_bytes())
    }
}

impl fmt::Debug for BlsKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlsKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Verify a single BLS signature.
pub fn verify_bls(pk: &BlsPublicKey, msg: &[u8], sig: &BlsSignature) -> bool {
    let pk = match bls::PublicKey::from_bytes(&pk.0) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let sig = match bls::Signature::from_bytes(&sig.0) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    sig.verify(true, msg, BLS_DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
}

/// Aggregate BLS signatures into one.
///
/// Returns `None` for an empty input or undecodable signatures.
pub fn aggregate_bls(sigs: &[BlsSignature]) -> Option<BlsSignature> {
    if sigs.is_empty() {
        return None;
    }
    let mut decoded = Vec::with_capacity(sigs.len());
    for sig in sigs {
        decoded.push(bls::Signature::from_bytes(&sig.0).ok()?);
    }
    let refs: Vec<&bls::Signature> = decoded.iter().collect();
    let agg = bls::AggregateSignature::aggregate(&refs, true).ok()?;
    Some(BlsSignature(agg.to_signature().to_bytes()))
}

/// Verify an aggregated signature where every signer signed the SAME message.
pub fn verify_aggregate_bls(sig: &BlsSignature, msg: &[u8], signers: &[BlsPublicKey]) -> bool {
    if signers.is_empty() {
        return false;
    }
    let sig = match bls::Signature::from_bytes(&sig.0) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    let mut pks = Vec::with_capacity(signers.len());
    for pk in signers {
        match bls::PublicKey::from_bytes(&pk.0) {
            Ok(pk) => pks.push(pk),
            Err(_) => return false,
        }
    }
    let refs: Vec<&bls::PublicKey> = pks.iter().collect();
    sig.fast_aggregate_verify(true, msg, BLS_DST, &refs) == BLST_ERROR::BLST_SUCCESS
}

/// An Ed25519 public key used for transport authentication.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdPublicKey(pub [u8; 32]);

impl EdPublicKey {
    pub const BYTES: usize = 32;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Self(arr)
    }
}

impl fmt::Debug for EdPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdPublicKey({}..)", hex::encode(&self.0[..6]))
    }
}

/// An Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EdSignature(pub [u8; 64]);

impl EdSignature {
    pub const BYTES: usize = 64;

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut arr = [0u8; 64];
        arr.copy_from_slice(bytes);
        Self(arr)
    }
}

impl fmt::Debug for EdSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdSignature({}..)", hex::encode(&self.0[..6]))
    }
}

/// Ed25519 signing key plus cached verifying key.
#[derive(Clone)]
pub struct EdKeyPair {
    signing: ed25519_dalek::SigningKey,
    public: EdPublicKey,
}

impl EdKeyPair {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing = ed25519_dalek::SigningKey::from_bytes(seed);
        let public = EdPublicKey(signing.verifying_key().to_bytes());
        Self { signing, public }
    }

    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut seed);
        Self::from_seed(&seed)
    }

    pub fn public_key(&self) -> EdPublicKey {
        self.public
    }

    pub fn sign(&self, msg: &[u8]) -> EdSignature {
        use ed25519_dalek::Signer;
        EdSignature(self.signing.sign(msg).to_bytes())
    }
}

impl fmt::Debug for EdKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Verify an Ed25519 signature.
pub fn verify_ed25519(pk: &EdPublicKey, msg: &[u8], sig: &EdSignature) -> bool {
    let vk = match ed25519_dalek::VerifyingKey::from_bytes(&pk.0) {
        Ok(vk) => vk,
        Err(_) => return false,
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig.0);
    vk.verify_strict(msg, &sig).is_ok()
}

/// The full key material a consensus participant holds.
#[derive(Debug, Clone)]
pub struct Keys {
    pub bls: BlsKeyPair,
    pub ed: EdKeyPair,
}

impl Keys {
    /// Derive both keypairs from a single 32-byte seed (tests, simulation).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let mut ed_seed = *seed;
        ed_seed[0] ^= 0xa5;
        Self {
            bls: BlsKeyPair::from_seed(seed),
            ed: EdKeyPair::from_seed(&ed_seed),
        }
    }

    pub fn generate() -> Self {
        Self {
            bls: BlsKeyPair::generate(),
            ed: EdKeyPair::generate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bls_sign_verify() {
        let keys = BlsKeyPair::from_seed(&[7u8; 32]);
        let sig = keys.sign(b"message");
        assert!(verify_bls(&keys.public_key(), b"message", &sig));
        assert!(!verify_bls(&keys.public_key(), b"other", &sig));
    }

    #[test]
    fn bls_aggregate_same_message() {
        let msg = b"round 1 step 2";
        let pairs: Vec<BlsKeyPair> = (0u8..4).map(|i| BlsKeyPair::from_seed(&[i; 32])).collect();
        let sigs: Vec<BlsSignature> = pairs.iter().map(|k| k.sign(msg)).collect();
        let pks: Vec<BlsPublicKey> = pairs.iter().map(|k| k.public_key()).collect();

        let agg = aggregate_bls(&sigs).unwrap();
        assert!(verify_aggregate_bls(&agg, msg, &pks));

        // Missing one signer must fail verification.
        assert!(!verify_aggregate_bls(&agg, msg, &pks[..3]));
    }

    #[test]
    fn aggregate_empty_is_none() {
        assert!(aggregate_bls(&[]).is_none());
    }

    #[test]
    fn ed25519_sign_verify() {
        let keys = EdKeyPair::from_seed(&[9u8; 32]);
        let sig = keys.sign(b"blob");
        assert!(verify_ed25519(&keys.public_key(), b"blob", &sig));
        assert!(!verify_ed25519(&keys.public_key(), b"tampered", &sig));
    }

    #[test]
    fn seeded_keys_deterministic() {
        let a = Keys::from_seed(&[3u8; 32]);
        let b = Keys::from_seed(&[3u8; 32]);
        assert_eq!(a.bls.public_key(), b.bls.public_key());
        assert_eq!(a.ed.public_key(), b.ed.public_key());
    }
}
