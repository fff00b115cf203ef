// compression.rs -- zlib payload compression
//
// Sequenced datagrams may carry a zlib-wrapped payload (compression flag in
// the second header word). The stream uses the standard zlib framing, the
// same as the engine's uncompress() calls.

use flate2::read::{ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use std::io::{self, Read};

/// Compresses `data` into a zlib stream.
pub fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(data, Compression::default());
    let mut compressed = Vec::with_capacity(data.len() / 2 + 16);
    encoder.read_to_end(&mut compressed)?;
    Ok(compressed)
}

/// Inflates a zlib stream, refusing to grow beyond `max_size`.
pub fn decompress(data: &[u8], max_size: usize) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::with_capacity(data.len().saturating_mul(2).min(max_size));

    let mut chunk = [0u8; 4096];
    loop {
        match decoder.read(&mut chunk)? {
            0 => break,
            n => {
                if decompressed.len() + n > max_size {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "decompressed payload exceeds the message size limit",
                    ));
                }
                decompressed.extend_from_slice(&chunk[..n]);
            }
        }
    }

    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let compressed = compress(&payload).unwrap();
        let decompressed = decompress(&compressed, 65536).unwrap();
        assert_eq!(payload, decompressed);
    }

    #[test]
    fn size_limit_is_enforced() {
        let payload = vec![0u8; 10000];
        let compressed = compress(&payload).unwrap();
        assert!(decompress(&compressed, 100).is_err());
        assert!(decompress(&compressed, 10000).is_ok());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decompress(&[1, 2, 3, 4, 5], 65536).is_err());
    }
}
