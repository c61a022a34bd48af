use std::path::Path;

use triplegen::{
    config::{Config, ConfigError, Mode},
    output,
    protocols::triples::TripleError,
};

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn config(rank: usize, port: u16, outdir: &Path, mode: Mode) -> Config {
    Config {
        rank,
        world_size: 2,
        modulus: 97,
        key_bits: 512,
        triples: 10,
        outdir: outdir.to_owned(),
        addr: "127.0.0.1".to_owned(),
        port,
        mode,
    }
}

#[test_log::test(tokio::test)]
async fn two_parties_over_tcp() {
    for mode in [Mode::Batched, Mode::Streaming] {
        let dir = tempfile::tempdir().unwrap();
        let port = free_port();
        let c0 = config(0, port, dir.path(), mode);
        let c1 = config(1, port, dir.path(), mode);

        let (p0, p1) = tokio::join!(triplegen::run(&c0), triplegen::run(&c1));
        assert!(p0.unwrap().ends_with("p1.csv"));
        assert!(p1.unwrap().ends_with("p2.csv"));

        let triples = output::verify(dir.path(), 97).unwrap();
        assert_eq!(triples.len(), 10);
    }
}

#[test_log::test(tokio::test)]
async fn bad_group_size_fails_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let outdir = dir.path().join("never-created");
    let cfg = Config {
        world_size: 3,
        ..config(1, free_port(), &outdir, Mode::Batched)
    };
    let res = triplegen::run(&cfg).await;
    assert!(matches!(
        res,
        Err(TripleError::Configuration(ConfigError::GroupSize(3)))
    ));
    assert!(!outdir.exists());
}
