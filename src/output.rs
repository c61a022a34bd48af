//! Share files.
//!
//! Each party persists its triples as `a,b,c` rows, one file per rank. The
//! triples themselves can only be recovered by combining both files.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::{net::session::Role, protocols::triples::Triple};

pub const HEADER: &str = "a,b,c";

/// Name of the share file written by `role`.
pub fn file_name(role: Role) -> &'static str {
    match role {
        Role::Authority => "p1.csv",
        Role::Peer => "p2.csv",
    }
}

/// Write our triples to `dir`, creating the directory when missing.
pub fn write_triples(dir: &Path, role: Role, triples: &[Triple]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name(role));
    let mut out = BufWriter::new(File::create(&path)?);
    writeln!(out, "{HEADER}")?;
    for Triple { a, b, c } in triples {
        writeln!(out, "{a},{b},{c}")?;
    }
    out.flush()?;
    Ok(path)
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: expected header '{HEADER}'")]
    Header { path: PathBuf },
    #[error("{path}:{line}: malformed row")]
    Parse { path: PathBuf, line: usize },
    #[error("{path}:{line}: value not below the modulus {modulus}")]
    OutOfRange {
        path: PathBuf,
        line: usize,
        modulus: u64,
    },
    #[error("Share files hold {0} and {1} rows")]
    LengthMismatch(usize, usize),
    #[error("Row {0}: shares do not combine into a multiplication triple")]
    NotATriple(usize),
}

/// Read a share file, checking that every value lies in `[0, modulus)`.
pub fn read_triples(path: &Path, modulus: u64) -> Result<Vec<Triple>, VerifyError> {
    let io = |source| VerifyError::Io {
        path: path.to_owned(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(io)?);
    let mut lines = reader.lines();

    let header = lines.next().transpose().map_err(io)?;
    if header.as_deref().map(str::trim) != Some(HEADER) {
        return Err(VerifyError::Header {
            path: path.to_owned(),
        });
    }

    let mut triples = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line.map_err(io)?;
        // Header is line 1.
        let lineno = i + 2;
        let values: Option<Vec<u64>> = line
            .trim()
            .split(',')
            .map(|v| v.trim().parse().ok())
            .collect();
        let [a, b, c] = values.as_deref().unwrap_or_default() else {
            return Err(VerifyError::Parse {
                path: path.to_owned(),
                line: lineno,
            });
        };
        if [a, b, c].iter().any(|&&v| v >= modulus) {
            return Err(VerifyError::OutOfRange {
                path: path.to_owned(),
                line: lineno,
                modulus,
            });
        }
        triples.push(Triple {
            a: *a,
            b: *b,
            c: *c,
        });
    }
    Ok(triples)
}

/// Combine both parties' share files in `dir` and check `c = a * b mod q` for every row.
///
/// Returns the reconstructed triples.
pub fn verify(dir: &Path, modulus: u64) -> Result<Vec<Triple>, VerifyError> {
    let first = read_triples(&dir.join(file_name(Role::Authority)), modulus)?;
    let second = read_triples(&dir.join(file_name(Role::Peer)), modulus)?;
    if first.len() != second.len() {
        return Err(VerifyError::LengthMismatch(first.len(), second.len()));
    }

    let q = u128::from(modulus);
    first
        .iter()
        .zip(&second)
        .enumerate()
        .map(|(i, (x, y))| {
            let a = (u128::from(x.a) + u128::from(y.a)) % q;
            let b = (u128::from(x.b) + u128::from(y.b)) % q;
            let c = (u128::from(x.c) + u128::from(y.c)) % q;
            if a * b % q != c {
                return Err(VerifyError::NotATriple(i));
            }
            Ok(Triple {
                a: a as u64,
                b: b as u64,
                c: c as u64,
            })
        })
        .collect()
}
