//! Run configuration.
//!
//! Every option can be given as a command line flag or through the
//! environment, see [`Config`].

use std::path::PathBuf;

use thiserror::Error;

/// The prime 2^61 - 1.
pub const DEFAULT_MODULUS: u64 = (1 << 61) - 1;
pub const DEFAULT_KEY_BITS: usize = 2048;
/// Smallest Paillier modulus we are willing to generate, regardless of `q`.
pub const MIN_KEY_BITS: usize = 256;

/// Exchange pattern for the encrypted shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Mode {
    /// One round trip carrying every triple.
    #[default]
    Batched,
    /// One round trip per triple.
    Streaming,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Exactly two parties are supported, but the group size was set to {0}")]
    GroupSize(usize),
    #[error("Rank must be 0 or 1, got {0}")]
    Rank(usize),
    #[error("The modulus must be at least 2, got {0}")]
    Modulus(u64),
    #[error("At least one triple must be requested")]
    NoTriples,
    #[error("A key of {key_bits} bits is too short, at least {min} bits are needed")]
    KeyTooShort { key_bits: usize, min: usize },
}

#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Rank of this party, 0 holds the private key.
    #[arg(long, env = "RANK", default_value_t = 0)]
    pub rank: usize,

    /// Number of parties in the group, must be 2.
    #[arg(long, env = "WORLD_SIZE", default_value_t = 2)]
    pub world_size: usize,

    /// Modulus `q` of the secret sharing ring, shared by both parties.
    #[arg(long, env = "MPC_MODULO", default_value_t = DEFAULT_MODULUS)]
    pub modulus: u64,

    /// Bit length of the Paillier modulus.
    #[arg(long, env = "PAILLIER_KEY_SIZE", default_value_t = DEFAULT_KEY_BITS)]
    pub key_bits: usize,

    /// Number of Beaver triples to generate.
    #[arg(long, env = "TRIPLES", default_value_t = 100)]
    pub triples: usize,

    /// Directory to write the share file to.
    #[arg(long, env = "OUTDIR", default_value = "/output")]
    pub outdir: PathBuf,

    /// Address of the rank 0 party.
    #[arg(long, env = "MASTER_ADDR", default_value = "localhost")]
    pub addr: String,

    /// Port the rank 0 party listens on.
    #[arg(long, env = "MASTER_PORT", default_value_t = 29500)]
    pub port: u16,

    #[arg(long, env = "TRIPLE_MODE", value_enum, default_value_t = Mode::Batched)]
    pub mode: Mode,
}

impl Config {
    /// Check the configuration before anything touches the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_group(self.rank, self.world_size)?;
        if self.modulus < 2 {
            return Err(ConfigError::Modulus(self.modulus));
        }
        if self.triples == 0 {
            return Err(ConfigError::NoTriples);
        }
        let min = min_key_bits(self.modulus);
        if self.key_bits < min {
            return Err(ConfigError::KeyTooShort {
                key_bits: self.key_bits,
                min,
            });
        }
        Ok(())
    }
}

/// Validate rank and group size for the two-party setting.
pub fn check_group(rank: usize, world_size: usize) -> Result<(), ConfigError> {
    if world_size != 2 {
        return Err(ConfigError::GroupSize(world_size));
    }
    if rank > 1 {
        return Err(ConfigError::Rank(rank));
    }
    Ok(())
}

/// Key length needed so that a masked cross term, at most `2q^2 + q`,
/// always lies in the positive half of the plaintext space.
pub fn min_key_bits(modulus: u64) -> usize {
    let bits = (u64::BITS - modulus.leading_zeros()) as usize;
    usize::max(2 * bits + 5, MIN_KEY_BITS)
}

#[cfg(test)]
mod test {
    use super::*;

    fn config() -> Config {
        Config {
            rank: 1,
            world_size: 2,
            modulus: 97,
            key_bits: 512,
            triples: 4,
            outdir: PathBuf::from("/tmp"),
            addr: "localhost".to_owned(),
            port: 29500,
            mode: Mode::Streaming,
        }
    }

    #[test]
    fn valid() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn group_size() {
        for world_size in [0, 1, 3] {
            let cfg = Config {
                world_size,
                ..config()
            };
            assert_eq!(cfg.validate(), Err(ConfigError::GroupSize(world_size)));
        }
        let cfg = Config { rank: 2, ..config() };
        assert_eq!(cfg.validate(), Err(ConfigError::Rank(2)));
    }

    #[test]
    fn parameters() {
        let cfg = Config { triples: 0, ..config() };
        assert_eq!(cfg.validate(), Err(ConfigError::NoTriples));
        let cfg = Config { modulus: 1, ..config() };
        assert_eq!(cfg.validate(), Err(ConfigError::Modulus(1)));
        let cfg = Config {
            key_bits: 128,
            ..config()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::KeyTooShort {
                key_bits: 128,
                min: MIN_KEY_BITS
            })
        );
    }

    #[test]
    fn key_bits_follow_modulus() {
        for q in [97, DEFAULT_MODULUS, u64::MAX] {
            let bits = (u64::BITS - q.leading_zeros()) as usize;
            assert!(min_key_bits(q) >= 2 * bits + 5);
        }
        assert_eq!(min_key_bits(97), MIN_KEY_BITS);
    }
}
