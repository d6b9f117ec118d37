//! Streaming request decompression with a hard byte cap (spec §4.1/§6.4).
//!
//! `tower_http::RequestDecompressionLayer` doesn't support a custom cap with
//! a 413 response, so this decodes `async-compression`'s buffered readers
//! chunk by chunk and aborts as soon as the cap is crossed, per SPEC_FULL §6.

use async_compression::tokio::bufread::{BrotliDecoder, DeflateDecoder, GzipDecoder};
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::error::ApiError;

const CHUNK_SIZE: usize = 64 * 1024;

pub async fn decompress_capped(
    content_encoding: Option<&str>,
    body: &[u8],
    cap: usize,
) -> Result<Vec<u8>, ApiError> {
    match content_encoding.map(str::to_ascii_lowercase).as_deref() {
        None | Some("") | Some("identity") => {
            if body.len() > cap {
                return Err(ApiError::PayloadTooLarge);
            }
            Ok(body.to_vec())
        }
        Some("gzip") => read_capped(GzipDecoder::new(BufReader::new(body)), cap).await,
        Some("deflate") => read_capped(DeflateDecoder::new(BufReader::new(body)), cap).await,
        Some("br") => read_capped(BrotliDecoder::new(BufReader::new(body)), cap).await,
        Some(other) => Err(ApiError::EnvelopeMalformed(format!(
            "unsupported content-encoding: {other}"
        ))),
    }
}

async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> Result<Vec<u8>, ApiError> {
    let mut out = Vec::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut chunk)
            .await
            .map_err(|e| ApiError::EnvelopeMalformed(format!("decompression failed: {e}")))?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
        if out.len() > cap {
            return Err(ApiError::PayloadTooLarge);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::write::GzipEncoder;
    use tokio::io::AsyncWriteExt;

    async fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(data).await.unwrap();
        encoder.shutdown().await.unwrap();
        encoder.into_inner()
    }

    #[tokio::test]
    async fn identity_passthrough_under_cap() {
        let body = b"hello world";
        let out = decompress_capped(None, body, 1024).await.unwrap();
        assert_eq!(out, body);
    }

    #[tokio::test]
    async fn identity_over_cap_rejected() {
        let body = vec![b'x'; 100];
        let err = decompress_capped(None, &body, 10).await.unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge));
    }

    #[tokio::test]
    async fn gzip_round_trip_under_cap() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = gzip(&original).await;
        let out = decompress_capped(Some("gzip"), &compressed, 10_000)
            .await
            .unwrap();
        assert_eq!(out, original);
    }

    #[tokio::test]
    async fn gzip_bomb_rejected_once_cap_crossed() {
        let original = vec![b'a'; 1_000_000];
        let compressed = gzip(&original).await;
        let err = decompress_capped(Some("gzip"), &compressed, 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::PayloadTooLarge));
    }

    #[tokio::test]
    async fn unknown_encoding_rejected() {
        let err = decompress_capped(Some("zstd"), b"x", 10).await.unwrap_err();
        assert!(matches!(err, ApiError::EnvelopeMalformed(_)));
    }
}
