//! A full run of one party: join, generate, persist, synchronize.

use std::path::PathBuf;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::Instrument;

use crate::{
    config::Config,
    net::session::TcpSession,
    output,
    protocols::triples::{self, TripleError, TripleParams},
};

impl From<&Config> for TripleParams {
    fn from(config: &Config) -> Self {
        TripleParams {
            modulus: config.modulus,
            key_bits: config.key_bits,
            count: config.triples,
            mode: config.mode,
        }
    }
}

/// Run one party of the triple generation and return the path of its share file.
///
/// The share file is only written once all triples are known, and the party
/// waits at a barrier for the other side to have written its file too.
pub async fn run(config: &Config) -> Result<PathBuf, TripleError> {
    config.validate()?;
    let span = tracing::info_span!("party", rank = config.rank);
    async {
        let mut session =
            TcpSession::connect(config.rank, config.world_size, &config.addr, config.port).await?;
        tracing::info!("Joined group");

        let mut rng = ChaCha20Rng::from_entropy();
        let triples = triples::generate(&mut session, &config.into(), &mut rng).await?;

        let path = output::write_triples(&config.outdir, session.role(), &triples)?;
        tracing::info!("saved {}", path.display());

        session.barrier().await?;
        session.shutdown().await?;
        Ok::<_, TripleError>(path)
    }
    .instrument(span)
    .await
}
