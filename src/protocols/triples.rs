//! Beaver triple generation between two parties using Paillier encryption.
//!
//! The authority (rank 0) generates a keypair and announces the public key.
//! Both parties draw their shares `a_i, b_i` of each triple locally. The cross
//! term `a0*b1 + a1*b0` is computed by the peer under the authority's key,
//! masked with a fresh `r_i` and sent back:
//!
//! ```text
//! Authority                                 Peer
//!     PublicKeyAnnounce(N)          ->
//!     Enc(a0_i), Enc(b0_i)          ->
//!                                   <-      Enc(a0_i*b1_i + a1_i*b0_i - r_i)
//! c0_i = a0_i*b0_i + (cross - r_i)          c1_i = a1_i*b1_i + r_i
//! ```
//!
//! so that `c0_i + c1_i = (a0_i + a1_i)(b0_i + b1_i) mod q`. The exchange can
//! happen one triple at a time or in a single batch; both give the same
//! output for the same randomness.

use itertools::{izip, Itertools};
use libpaillier::unknown_order::BigNumber;
use rand::{CryptoRng, Rng, RngCore};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::instrument;

use crate::{
    config::{ConfigError, Mode},
    net::session::{Role, Session, SessionError},
    paillier::{self, Ciphertext, CryptoError, Keypair, PublicKey},
    protocols::messages::{decode_ciphertext, encode_ciphertext, Message, Tag, WireCiphertext},
};

/// One party's additive share of a Beaver triple, every value in `[0, q)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triple {
    pub a: u64,
    pub b: u64,
    pub c: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TripleParams {
    /// Modulus `q` of the shares.
    pub modulus: u64,
    /// Bit length of the authority's Paillier key.
    pub key_bits: usize,
    /// Number of triples to generate.
    pub count: usize,
    pub mode: Mode,
}

#[derive(Error, Debug)]
pub enum TripleError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(SessionError),
    #[error("Protocol desynchronized: {0}")]
    Desync(SessionError),
    #[error("Protocol desynchronized: expected {expected}, got {got}")]
    UnexpectedMessage { expected: Tag, got: Tag },
    #[error("Protocol desynchronized: expected {expected} ciphertexts, got {got}")]
    BatchLength { expected: usize, got: usize },
    #[error("Protocol desynchronized: malformed ciphertext: {0}")]
    MalformedCiphertext(CryptoError),
    #[error("Cryptosystem error: {0}")]
    Cryptosystem(#[from] CryptoError),
    #[error("Failed to persist shares: {0}")]
    Output(#[from] std::io::Error),
}

impl From<SessionError> for TripleError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Configuration(e) => TripleError::Configuration(e),
            e if e.is_desync() => TripleError::Desync(e),
            e => TripleError::Transport(e),
        }
    }
}

fn unexpected(expected: Tag, got: &Message) -> TripleError {
    let got = got.tag();
    tracing::error!("Expected {expected}, received {got}");
    TripleError::UnexpectedMessage { expected, got }
}

fn check_batch(expected: usize, got: usize) -> Result<(), TripleError> {
    if expected == got {
        Ok(())
    } else {
        tracing::error!("Expected a batch of {expected}, received {got}");
        Err(TripleError::BatchLength { expected, got })
    }
}

fn decode(c: &WireCiphertext) -> Result<Ciphertext, TripleError> {
    decode_ciphertext(c).map_err(|e| {
        tracing::error!("Received a malformed ciphertext: {e}");
        TripleError::MalformedCiphertext(e)
    })
}

/// Draw `count` local shares `(a_i, b_i)` uniformly from `[0, q)`.
pub fn draw_shares(rng: &mut impl Rng, modulus: u64, count: usize) -> Vec<(u64, u64)> {
    (0..count)
        .map(|_| (rng.gen_range(0..modulus), rng.gen_range(0..modulus)))
        .collect()
}

fn mul_mod(x: u64, y: u64, q: u64) -> u64 {
    ((u128::from(x) * u128::from(y)) % u128::from(q)) as u64
}

fn add_mod(x: u64, y: u64, q: u64) -> u64 {
    ((u128::from(x) + u128::from(y)) % u128::from(q)) as u64
}

/// Largest plaintext a masked cross term can take, `2(q-1)^2 + q`.
fn cross_term_bound(modulus: u64) -> BigNumber {
    let q = BigNumber::from(modulus);
    let q1 = BigNumber::from(modulus - 1);
    &q1 * &q1 + &q1 * &q1 + q
}

/// The key holding side of the protocol.
pub struct Authority {
    keypair: Keypair,
    modulus: u64,
}

impl Authority {
    pub fn new(keypair: Keypair, modulus: u64) -> Result<Self, TripleError> {
        keypair.public.ensure_capacity(&cross_term_bound(modulus))?;
        Ok(Self { keypair, modulus })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public
    }

    /// Encrypt the local shares of one triple.
    pub fn encrypt_pair(
        &self,
        (a, b): (u64, u64),
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<(Ciphertext, Ciphertext), TripleError> {
        let public = &self.keypair.public;
        let a = public.encrypt(&BigNumber::from(a), rng)?;
        let b = public.encrypt(&BigNumber::from(b), rng)?;
        Ok((a, b))
    }

    /// Decrypt the masked cross term, reduced into `[0, q)`.
    pub fn unmask(&self, masked: &Ciphertext) -> Result<u64, TripleError> {
        let cross_minus_r = self.keypair.private.decrypt(masked)?;
        let reduced = cross_minus_r.nmod(&BigNumber::from(self.modulus));
        paillier::to_u64(&reduced).ok_or(CryptoError::Decryption.into())
    }

    /// `c0 = a0*b0 + (cross - r) mod q`
    pub fn share(&self, (a, b): (u64, u64), cross_minus_r: u64) -> Triple {
        let q = self.modulus;
        Triple {
            a,
            b,
            c: add_mod(mul_mod(a, b, q), cross_minus_r, q),
        }
    }

    /// Finish one triple from the peer's masked cross term.
    pub fn finish(&self, share: (u64, u64), masked: &Ciphertext) -> Result<Triple, TripleError> {
        let cross_minus_r = self.unmask(masked)?;
        Ok(self.share(share, cross_minus_r))
    }
}

/// The side that only knows the public key.
pub struct Peer {
    public: PublicKey,
    modulus: u64,
}

impl Peer {
    pub fn new(public: PublicKey, modulus: u64) -> Result<Self, TripleError> {
        public.ensure_capacity(&cross_term_bound(modulus))?;
        Ok(Self { public, modulus })
    }

    /// Compute `Enc(a0*b1 + a1*b0 - r)` from the authority's encrypted shares.
    ///
    /// The mask is encrypted as `(-r) mod q`, which keeps the plaintext
    /// non-negative without changing the result mod `q`.
    pub fn mask_cross_term(
        &self,
        (enc_a, enc_b): (&Ciphertext, &Ciphertext),
        (a, b): (u64, u64),
        r: u64,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<Ciphertext, TripleError> {
        let public = &self.public;
        let cross = public.add(
            &public.scalar_mul(enc_a, &BigNumber::from(b))?,
            &public.scalar_mul(enc_b, &BigNumber::from(a))?,
        )?;
        let neg_r = (self.modulus - r) % self.modulus;
        let mask = public.encrypt(&BigNumber::from(neg_r), rng)?;
        Ok(public.add(&cross, &mask)?)
    }

    /// `c1 = a1*b1 + r mod q`
    pub fn share(&self, (a, b): (u64, u64), r: u64) -> Triple {
        let q = self.modulus;
        Triple {
            a,
            b,
            c: add_mod(mul_mod(a, b, q), r, q),
        }
    }

    /// Draw a mask and answer one encrypted pair, returning the reply and our triple.
    pub fn respond(
        &self,
        pair: (&Ciphertext, &Ciphertext),
        share: (u64, u64),
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<(Ciphertext, Triple), TripleError> {
        let r = rng.gen_range(0..self.modulus);
        let masked = self.mask_cross_term(pair, share, r, rng)?;
        Ok((masked, self.share(share, r)))
    }
}

/// Run the triple generation protocol for our role in the session.
///
/// Returns our share of `params.count` triples in generation order.
pub async fn generate<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    session: &mut Session<R, W>,
    params: &TripleParams,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<Triple>, TripleError> {
    if params.modulus < 2 {
        return Err(ConfigError::Modulus(params.modulus).into());
    }
    match session.role() {
        Role::Authority => run_authority(session, params, rng).await,
        Role::Peer => run_peer(session, params, rng).await,
    }
}

#[instrument(skip_all, fields(rank = 0, mode = ?params.mode))]
async fn run_authority<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    session: &mut Session<R, W>,
    params: &TripleParams,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<Triple>, TripleError> {
    let peer = session.peer_rank();

    tracing::info!("Generating {} bit keypair", params.key_bits);
    let keypair = paillier::generate_keypair(params.key_bits)?;
    let authority = Authority::new(keypair, params.modulus)?;
    let modulus = authority.public_key().modulus().to_bytes();
    session
        .send_obj(peer, &Message::PublicKeyAnnounce(modulus))
        .await?;

    let shares = draw_shares(rng, params.modulus, params.count);
    let triples = match params.mode {
        Mode::Streaming => {
            let mut triples = Vec::with_capacity(shares.len());
            for (i, &share) in shares.iter().enumerate() {
                let (a, b) = authority.encrypt_pair(share, rng)?;
                let msg = Message::EncryptedPair {
                    a: encode_ciphertext(&a),
                    b: encode_ciphertext(&b),
                };
                session.send_obj(peer, &msg).await?;
                let masked = match session.recv_obj(peer).await? {
                    Message::EncryptedMaskedCrossTerm(c) => c,
                    other => return Err(unexpected(Tag::EncryptedMaskedCrossTerm, &other)),
                };
                triples.push(authority.finish(share, &decode(&masked)?)?);
                tracing::debug!("Triple {i} done");
            }
            triples
        }
        Mode::Batched => {
            let (a, b): (Vec<_>, Vec<_>) = shares
                .iter()
                .map(|&share| {
                    let (a, b) = authority.encrypt_pair(share, rng)?;
                    Ok((encode_ciphertext(&a), encode_ciphertext(&b)))
                })
                .collect::<Result<Vec<_>, TripleError>>()?
                .into_iter()
                .unzip();
            session
                .send_obj(peer, &Message::EncryptedPairBatch { a, b })
                .await?;
            let masked = match session.recv_obj(peer).await? {
                Message::EncryptedMaskedBatch(batch) => batch,
                other => return Err(unexpected(Tag::EncryptedMaskedBatch, &other)),
            };
            check_batch(shares.len(), masked.len())?;
            shares
                .iter()
                .zip_eq(&masked)
                .map(|(&share, c)| authority.finish(share, &decode(c)?))
                .collect::<Result<_, _>>()?
        }
    };
    tracing::info!("Generated {} triples", triples.len());
    Ok(triples)
}

#[instrument(skip_all, fields(rank = 1, mode = ?params.mode))]
async fn run_peer<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    session: &mut Session<R, W>,
    params: &TripleParams,
    rng: &mut (impl RngCore + CryptoRng),
) -> Result<Vec<Triple>, TripleError> {
    let authority = session.peer_rank();

    let modulus = match session.recv_obj(authority).await? {
        Message::PublicKeyAnnounce(n) => BigNumber::from_slice(n),
        other => return Err(unexpected(Tag::PublicKeyAnnounce, &other)),
    };
    let peer = Peer::new(PublicKey::from_modulus(&modulus)?, params.modulus)?;
    tracing::info!("Received public key");

    let shares = draw_shares(rng, params.modulus, params.count);
    let triples = match params.mode {
        Mode::Streaming => {
            let mut triples = Vec::with_capacity(shares.len());
            for (i, &share) in shares.iter().enumerate() {
                let (a, b) = match session.recv_obj(authority).await? {
                    Message::EncryptedPair { a, b } => (a, b),
                    other => return Err(unexpected(Tag::EncryptedPair, &other)),
                };
                let (a, b) = (decode(&a)?, decode(&b)?);
                let (masked, triple) = peer.respond((&a, &b), share, rng)?;
                let msg = Message::EncryptedMaskedCrossTerm(encode_ciphertext(&masked));
                session.send_obj(authority, &msg).await?;
                triples.push(triple);
                tracing::debug!("Triple {i} done");
            }
            triples
        }
        Mode::Batched => {
            let (a, b) = match session.recv_obj(authority).await? {
                Message::EncryptedPairBatch { a, b } => (a, b),
                other => return Err(unexpected(Tag::EncryptedPairBatch, &other)),
            };
            check_batch(shares.len(), a.len())?;
            check_batch(shares.len(), b.len())?;

            let mut triples = Vec::with_capacity(shares.len());
            let mut masked: Vec<WireCiphertext> = Vec::with_capacity(shares.len());
            for (&share, a, b) in izip!(&shares, &a, &b) {
                let (a, b) = (decode(a)?, decode(b)?);
                let (reply, triple) = peer.respond((&a, &b), share, rng)?;
                masked.push(encode_ciphertext(&reply));
                triples.push(triple);
            }
            session
                .send_obj(authority, &Message::EncryptedMaskedBatch(masked))
                .await?;
            triples
        }
    };
    tracing::info!("Generated {} triples", triples.len());
    Ok(triples)
}
