//! Tools for running both parties of a protocol inside one test.

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::{
    net::session::DuplexSession,
    protocols::triples::{generate, Triple, TripleError, TripleParams},
};

/// Run one party to completion, barrier included.
///
/// The session is owned, so it is dropped as soon as this party fails and
/// the other side sees a hang-up instead of waiting forever.
pub async fn run_party(
    mut session: DuplexSession,
    params: TripleParams,
    seed: u64,
) -> Result<Vec<Triple>, TripleError> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let triples = generate(&mut session, &params, &mut rng).await?;
    session.barrier().await?;
    Ok(triples)
}

/// Run triple generation for both ranks over an in-memory session.
///
/// Each party gets its own deterministic randomness from its seed.
/// Returns the triples of rank 0 and rank 1.
pub async fn run_pair(params: TripleParams, seed0: u64, seed1: u64) -> (Vec<Triple>, Vec<Triple>) {
    let (s0, s1) = DuplexSession::in_memory().await.unwrap();
    let (t0, t1) = futures::join!(
        run_party(s0, params, seed0),
        run_party(s1, params, seed1)
    );
    (t0.unwrap(), t1.unwrap())
}
