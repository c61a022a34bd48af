//! Length-prefixed framing.
//!
//! Every frame is an 8-byte big-endian length header followed by exactly that
//! many payload bytes. A zero-length frame is a bare header.

use tokio_util::codec::{LengthDelimitedCodec, LengthDelimitedCodecError};

/// Width of the length header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted by default (1 GiB).
pub const DEFAULT_MAX_FRAME: usize = 1 << 30;

/// Encode a payload length as a fixed-width header.
pub fn encode_length(n: usize) -> [u8; HEADER_LEN] {
    (n as u64).to_be_bytes()
}

/// Decode a fixed-width header back into a payload length.
pub fn decode_length(header: [u8; HEADER_LEN]) -> u64 {
    u64::from_be_bytes(header)
}

/// Codec producing the frames described in the module docs.
pub fn length_delimited(max_frame: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(HEADER_LEN)
        .big_endian()
        .max_frame_length(max_frame)
        .new_codec()
}

/// Whether an I/O error from the codec is an oversized frame.
pub fn is_oversized(err: &std::io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>())
}

#[cfg(test)]
mod test {
    use tokio_util::{
        bytes::{Bytes, BytesMut},
        codec::{Decoder, Encoder},
    };

    use super::*;

    fn roundtrip(payload: &[u8]) -> BytesMut {
        let mut codec = length_delimited(DEFAULT_MAX_FRAME);
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::copy_from_slice(payload), &mut buf)
            .unwrap();
        assert_eq!(buf.len(), HEADER_LEN + payload.len());
        assert_eq!(buf[..HEADER_LEN], encode_length(payload.len()));
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty());
        frame
    }

    #[test]
    fn length_header() {
        assert_eq!(encode_length(0), [0u8; HEADER_LEN]);
        assert_eq!(decode_length(encode_length(0)), 0);
        assert_eq!(
            decode_length(encode_length(DEFAULT_MAX_FRAME)),
            DEFAULT_MAX_FRAME as u64
        );
        assert_eq!(encode_length(258), [0, 0, 0, 0, 0, 0, 1, 2]);
    }

    #[test]
    fn codec_writes_length_header() {
        let mut codec = length_delimited(DEFAULT_MAX_FRAME);
        let mut buf = BytesMut::new();
        codec.encode(Bytes::from(vec![7u8; 258]), &mut buf).unwrap();
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&buf[..HEADER_LEN]);
        assert_eq!(decode_length(header), 258);
    }

    #[test]
    fn empty_frame_is_header_only() {
        let frame = roundtrip(&[]);
        assert!(frame.is_empty());
    }

    #[test]
    fn frames() {
        assert_eq!(&roundtrip(b"hello")[..], b"hello");
        let big: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();
        assert_eq!(&roundtrip(&big)[..], &big[..]);
    }

    #[test]
    fn partial_input() {
        let mut codec = length_delimited(DEFAULT_MAX_FRAME);
        let mut wire = BytesMut::new();
        codec.encode(Bytes::from_static(b"abcdef"), &mut wire).unwrap();
        codec.encode(Bytes::new(), &mut wire).unwrap();

        let mut src = BytesMut::new();
        // Header arrives in two pieces, then the payload trickles in.
        src.extend_from_slice(&wire[..3]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&wire[3..10]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&wire[10..]);
        assert_eq!(&codec.decode(&mut src).unwrap().unwrap()[..], b"abcdef");
        assert!(codec.decode(&mut src).unwrap().unwrap().is_empty());
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn oversized() {
        let mut codec = length_delimited(4);
        let mut buf = BytesMut::new();
        let err = codec
            .encode(Bytes::from_static(b"too long"), &mut buf)
            .unwrap_err();
        assert!(is_oversized(&err));

        let mut src = BytesMut::from(&encode_length(5)[..]);
        let err = codec.decode(&mut src).unwrap_err();
        assert!(is_oversized(&err));

        let plain = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert!(!is_oversized(&plain));
    }
}
