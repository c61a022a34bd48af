//! Paillier encryption.
//!
//! Thin layer over [`libpaillier`]. Plaintexts are signed integers: `x` is
//! encoded as `x mod N`, and decryption maps the upper half of `[0, N)` back
//! to negative numbers. Ciphertexts carry an explicit base-16 exponent which
//! is realigned automatically when two ciphertexts are added.

use libpaillier::{unknown_order::BigNumber, DecryptionKey, EncryptionKey};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

/// Base of the fixed-point exponent carried by a [`Ciphertext`].
pub const EXPONENT_BASE_BITS: usize = 4;

/// Largest exponent magnitude accepted on a [`Ciphertext`].
pub const MAX_EXPONENT: u32 = 16;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Failed to generate a {0} bit keypair")]
    KeyGeneration(usize),
    #[error("Invalid public key: {0}")]
    InvalidKey(&'static str),
    #[error("Plaintext outside of the supported range")]
    PlaintextOutOfRange,
    #[error("Encryption failed")]
    Encryption,
    #[error("Decryption failed, ciphertext out of range")]
    Decryption,
    #[error("Homomorphic operation on a malformed ciphertext")]
    Homomorphic,
    #[error("Ciphertext with exponent {0} does not hold an integer")]
    NonIntegral(i32),
    #[error("Ciphertext exponent {0} out of range")]
    ExponentOutOfRange(i32),
    #[error("Plaintext space of {bits} bits cannot hold the protocol values")]
    ModulusTooSmall { bits: usize },
}

/// An encrypted integer.
///
/// The plaintext is `m * 16^exponent` where `m` is the encrypted value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ciphertext {
    pub value: BigNumber,
    pub exponent: i32,
}

#[derive(Clone)]
pub struct PublicKey(EncryptionKey);

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("bits", &self.modulus().bit_length())
            .finish_non_exhaustive()
    }
}

pub struct PrivateKey {
    key: DecryptionKey,
    modulus: BigNumber,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey([redacted])")
    }
}

#[derive(Debug)]
pub struct Keypair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

/// Generate a fresh keypair with a modulus of roughly `bits` bits.
pub fn generate_keypair(bits: usize) -> Result<Keypair, CryptoError> {
    if bits < 16 {
        return Err(CryptoError::KeyGeneration(bits));
    }
    let half = bits / 2;
    let p = BigNumber::prime(half);
    let mut q = BigNumber::prime(bits - half);
    while q == p {
        q = BigNumber::prime(bits - half);
    }
    let key =
        DecryptionKey::with_primes_unchecked(&p, &q).ok_or(CryptoError::KeyGeneration(bits))?;
    let public = PublicKey(EncryptionKey::from(&key));
    let modulus = public.modulus().clone();
    Ok(Keypair {
        public,
        private: PrivateKey { key, modulus },
    })
}

impl PublicKey {
    /// Rebuild a public key from its modulus alone.
    pub fn from_modulus(n: &BigNumber) -> Result<Self, CryptoError> {
        if n <= &BigNumber::one() {
            return Err(CryptoError::InvalidKey("modulus must be larger than one"));
        }
        let key = EncryptionKey::from_bytes(n.to_bytes())
            .map_err(|_| CryptoError::InvalidKey("malformed modulus"))?;
        Ok(Self(key))
    }

    /// The modulus `N`, which is also the plaintext space.
    pub fn modulus(&self) -> &BigNumber {
        self.0.n()
    }

    /// Fail unless every value of magnitude at most `bound` can be encrypted
    /// and decrypted unambiguously.
    pub fn ensure_capacity(&self, bound: &BigNumber) -> Result<(), CryptoError> {
        if &(bound + bound) < self.modulus() {
            Ok(())
        } else {
            Err(CryptoError::ModulusTooSmall {
                bits: self.modulus().bit_length(),
            })
        }
    }

    /// Encrypt a signed integer.
    pub fn encrypt(
        &self,
        plaintext: &BigNumber,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Ciphertext, CryptoError> {
        let n = self.modulus();
        let magnitude = if plaintext < &BigNumber::zero() {
            -plaintext.clone()
        } else {
            plaintext.clone()
        };
        if &(&magnitude + &magnitude) > n {
            return Err(CryptoError::PlaintextOutOfRange);
        }
        let encoded = plaintext.nmod(n);
        let nonce = self.nonce(rng);
        if encoded == BigNumber::zero() {
            // libpaillier only takes plaintexts in [1, N), Enc(0) = r^N mod N^2.
            let value = nonce.modpow(n, self.0.nn());
            return Ok(Ciphertext { value, exponent: 0 });
        }
        let (value, _) = self
            .0
            .encrypt(encoded.to_bytes(), Some(nonce))
            .ok_or(CryptoError::Encryption)?;
        Ok(Ciphertext { value, exponent: 0 })
    }

    /// Homomorphic addition, realigning exponents when they differ.
    pub fn add(&self, c1: &Ciphertext, c2: &Ciphertext) -> Result<Ciphertext, CryptoError> {
        check_exponent(c1.exponent)?;
        check_exponent(c2.exponent)?;
        let (c1, c2) = match c1.exponent.cmp(&c2.exponent) {
            std::cmp::Ordering::Equal => (c1.clone(), c2.clone()),
            std::cmp::Ordering::Greater => (self.lower_exponent(c1, c2.exponent)?, c2.clone()),
            std::cmp::Ordering::Less => (c1.clone(), self.lower_exponent(c2, c1.exponent)?),
        };
        let value = self
            .0
            .add(&c1.value, &c2.value)
            .ok_or(CryptoError::Homomorphic)?;
        Ok(Ciphertext {
            value,
            exponent: c1.exponent,
        })
    }

    /// Homomorphic multiplication by a known, signed scalar.
    pub fn scalar_mul(&self, c: &Ciphertext, k: &BigNumber) -> Result<Ciphertext, CryptoError> {
        check_exponent(c.exponent)?;
        let k = k.nmod(self.modulus());
        let value = if k == BigNumber::zero() {
            // The scalar 0 is rejected by libpaillier; 1 is the trivial encryption of 0.
            if !self.is_ciphertext(&c.value) {
                return Err(CryptoError::Homomorphic);
            }
            BigNumber::one()
        } else {
            self.0.mul(&c.value, &k).ok_or(CryptoError::Homomorphic)?
        };
        Ok(Ciphertext {
            value,
            exponent: c.exponent,
        })
    }

    /// Fresh nonce in `[1, N)`.
    fn nonce(&self, rng: &mut (impl RngCore + CryptoRng)) -> BigNumber {
        loop {
            let r = BigNumber::from_rng(self.modulus(), rng);
            if r != BigNumber::zero() {
                return r;
            }
        }
    }

    fn is_ciphertext(&self, value: &BigNumber) -> bool {
        &BigNumber::one() <= value && value < self.0.nn()
    }

    fn lower_exponent(&self, c: &Ciphertext, exponent: i32) -> Result<Ciphertext, CryptoError> {
        let diff = c
            .exponent
            .checked_sub(exponent)
            .ok_or(CryptoError::ExponentOutOfRange(c.exponent))?;
        let shift = diff.unsigned_abs() as usize * EXPONENT_BASE_BITS;
        let scaled = self.scalar_mul(c, &(BigNumber::one() << shift))?;
        Ok(Ciphertext {
            value: scaled.value,
            exponent,
        })
    }
}

impl PrivateKey {
    /// Decrypt into a signed integer.
    pub fn decrypt(&self, c: &Ciphertext) -> Result<BigNumber, CryptoError> {
        check_exponent(c.exponent)?;
        if c.exponent < 0 {
            return Err(CryptoError::NonIntegral(c.exponent));
        }
        let bytes = self.key.decrypt(&c.value).ok_or(CryptoError::Decryption)?;
        let m = BigNumber::from_slice(bytes);
        let m = if &(&m + &m) > &self.modulus {
            m - &self.modulus
        } else {
            m
        };
        Ok(m << (c.exponent.unsigned_abs() as usize * EXPONENT_BASE_BITS))
    }
}

/// Reject exponents this crate could never have produced.
pub fn check_exponent(exponent: i32) -> Result<(), CryptoError> {
    if exponent.unsigned_abs() > MAX_EXPONENT {
        return Err(CryptoError::ExponentOutOfRange(exponent));
    }
    Ok(())
}

/// Convert a non-negative number below 2^64.
pub(crate) fn to_u64(n: &BigNumber) -> Option<u64> {
    if n < &BigNumber::zero() {
        return None;
    }
    let bytes = n.to_bytes();
    let bytes = {
        // Leading zeroes do not count towards the width.
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        &bytes[skip..]
    };
    if bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}
