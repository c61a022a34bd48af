//! Messages exchanged while generating triples.

use libpaillier::unknown_order::BigNumber;
use serde::{Deserialize, Serialize};

use crate::paillier::{check_exponent, Ciphertext, CryptoError};

/// A ciphertext as plain bytes and exponent, so no library types end up on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireCiphertext {
    /// Big-endian ciphertext value.
    pub value: Vec<u8>,
    pub exponent: i32,
}

pub fn encode_ciphertext(c: &Ciphertext) -> WireCiphertext {
    WireCiphertext {
        value: c.value.to_bytes(),
        exponent: c.exponent,
    }
}

/// Rebuild a ciphertext, rejecting exponents outside [`crate::paillier::MAX_EXPONENT`].
pub fn decode_ciphertext(c: &WireCiphertext) -> Result<Ciphertext, CryptoError> {
    check_exponent(c.exponent)?;
    Ok(Ciphertext {
        value: BigNumber::from_slice(&c.value),
        exponent: c.exponent,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Public key modulus `N`, big-endian.
    PublicKeyAnnounce(Vec<u8>),
    EncryptedPair {
        a: WireCiphertext,
        b: WireCiphertext,
    },
    EncryptedPairBatch {
        a: Vec<WireCiphertext>,
        b: Vec<WireCiphertext>,
    },
    EncryptedMaskedCrossTerm(WireCiphertext),
    EncryptedMaskedBatch(Vec<WireCiphertext>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    PublicKeyAnnounce,
    EncryptedPair,
    EncryptedPairBatch,
    EncryptedMaskedCrossTerm,
    EncryptedMaskedBatch,
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::PublicKeyAnnounce(_) => Tag::PublicKeyAnnounce,
            Message::EncryptedPair { .. } => Tag::EncryptedPair,
            Message::EncryptedPairBatch { .. } => Tag::EncryptedPairBatch,
            Message::EncryptedMaskedCrossTerm(_) => Tag::EncryptedMaskedCrossTerm,
            Message::EncryptedMaskedBatch(_) => Tag::EncryptedMaskedBatch,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ciphertext_keeps_exponent() {
        let c = Ciphertext {
            value: BigNumber::from(0xdead_beefu64),
            exponent: -3,
        };
        let wire = encode_ciphertext(&c);
        assert_eq!(wire.value, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decode_ciphertext(&wire), Ok(c));
    }

    #[test]
    fn huge_exponent_is_rejected() {
        let wire = WireCiphertext {
            value: vec![1],
            exponent: i32::MAX,
        };
        assert_eq!(
            decode_ciphertext(&wire),
            Err(CryptoError::ExponentOutOfRange(i32::MAX))
        );
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let msg = Message::EncryptedMaskedCrossTerm(WireCiphertext {
            value: vec![1, 2, 3],
            exponent: 0,
        });
        let mut bytes = bincode::serialize(&msg).unwrap();
        let back: Message = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.tag(), Tag::EncryptedMaskedCrossTerm);

        // bincode stores the variant index as a little-endian u32 up front.
        bytes[0] = 17;
        assert!(bincode::deserialize::<Message>(&bytes).is_err());
    }
}
