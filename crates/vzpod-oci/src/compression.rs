//! Gzip compression with digest fan-out and sparse-aware decompression.
//!
//! These helpers are synchronous and CPU/disk bound; async callers run them
//! on a blocking task.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio_util::sync::CancellationToken;

use crate::digest::{write_digest_file, Digest, Digester};
use crate::error::Result;
use vzpod_error::CommonError;

/// Block size used when feeding the compressor.
pub const GZIP_BLOCK_SIZE: usize = 100_000;

/// Read buffer size for decompression.
const DECOMPRESS_BUF_SIZE: usize = 4 << 20;

/// Sub-block granularity for sparse writes during decompression.
const SPARSE_BLOCK_SIZE: usize = 64 << 10;

/// Output of [`compress_file`].
#[derive(Debug)]
pub struct CompressionResult {
    /// Path of the compressed output file.
    pub output_path: PathBuf,
    /// Size of the compressed output.
    pub compressed_size: u64,
    /// Size of the source content.
    pub uncompressed_size: u64,
    /// Digest of the compressed output.
    pub gz_digest: Digest,
    /// Digest of the source content.
    pub uncompressed_digest: Digest,
}

/// Writer fanning compressed bytes into the output file and a digest
/// accumulator simultaneously.
struct FanoutWriter<'a> {
    file: &'a mut File,
    digester: &'a mut Digester,
}

impl Write for FanoutWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write_all(buf)?;
        self.digester.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Gzip-compresses the file at `input_path` into `output_path`, computing
/// the compressed and uncompressed digests in a single pass.
///
/// # Errors
///
/// Returns an I/O error if the source cannot be read or the output cannot
/// be written.
pub fn compress_file(input_path: &Path, output_path: &Path) -> Result<CompressionResult> {
    let mut input = File::open(input_path)?;
    let mut output = File::create(output_path)?;

    let mut gz_digester = Digester::new();
    let mut uncompressed_digester = Digester::new();
    let mut uncompressed_size: u64 = 0;

    {
        let fanout = FanoutWriter {
            file: &mut output,
            digester: &mut gz_digester,
        };
        let mut encoder = GzEncoder::new(fanout, Compression::default());

        let mut buf = vec![0u8; GZIP_BLOCK_SIZE];
        loop {
            let n = input.read(&mut buf)?;
            if n == 0 {
                break;
            }
            uncompressed_digester.update(&buf[..n]);
            uncompressed_size += n as u64;
            encoder.write_all(&buf[..n])?;
        }
        encoder.finish()?;
    }
    output.sync_all()?;

    let compressed_size = output.metadata()?.len();
    Ok(CompressionResult {
        output_path: output_path.to_path_buf(),
        compressed_size,
        uncompressed_size,
        gz_digest: gz_digester.finalize(),
        uncompressed_digest: uncompressed_digester.finalize(),
    })
}

/// Decompresses the gzip file at `input_path` into `output_path`.
///
/// The output is pre-truncated to `uncompressed_size`; the stream is then
/// walked in 64 KiB sub-blocks, each fed to the digest accumulator, and
/// only non-zero sub-blocks are seeked to and written. On filesystems
/// supporting holes the skipped regions stay unallocated. The computed
/// digest is written to the output's sidecar and returned.
///
/// # Errors
///
/// Returns `Cancelled` when the token fires mid-stream, or an I/O error on
/// read/write failure.
pub fn decompress_file(
    input_path: &Path,
    output_path: &Path,
    uncompressed_size: u64,
    cancel: &CancellationToken,
) -> Result<Digest> {
    let input = File::open(input_path)?;
    let mut output = File::create(output_path)?;
    output.set_len(uncompressed_size)?;

    let mut decoder = GzDecoder::new(BufReader::with_capacity(DECOMPRESS_BUF_SIZE, input));

    let mut digester = Digester::new();
    let mut buf = vec![0u8; DECOMPRESS_BUF_SIZE];
    let zero_block = vec![0u8; SPARSE_BLOCK_SIZE];
    let mut offset: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(CommonError::Cancelled.into());
        }

        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }

        let mut i = 0;
        while i < n {
            let end = (i + SPARSE_BLOCK_SIZE).min(n);
            let chunk = &buf[i..end];
            i = end;

            digester.update(chunk);

            if chunk != &zero_block[..chunk.len()] {
                output.seek(SeekFrom::Start(offset))?;
                output.write_all(chunk)?;
            }

            offset += chunk.len() as u64;
        }
    }

    let digest = digester.finalize();
    write_digest_file(output_path, &digest)?;
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest_file_path;
    use rand::RngCore;

    fn compress_to_temp(dir: &Path, content: &[u8]) -> (PathBuf, PathBuf, CompressionResult) {
        let src = dir.join("src.img");
        std::fs::write(&src, content).unwrap();
        let gz = dir.join("src.img.gz");
        let res = compress_file(&src, &gz).unwrap();
        (src, gz, res)
    }

    #[test]
    fn test_compress_records_both_digests() {
        let dir = tempfile::tempdir().unwrap();
        let content = b"some disk image bytes".repeat(1000);
        let (_, gz, res) = compress_to_temp(dir.path(), &content);

        assert_eq!(res.uncompressed_size, content.len() as u64);
        assert_eq!(res.uncompressed_digest, Digest::from_bytes(&content));
        assert_eq!(res.compressed_size, std::fs::metadata(&gz).unwrap().len());
        let gz_bytes = std::fs::read(&gz).unwrap();
        assert_eq!(res.gz_digest, Digest::from_bytes(&gz_bytes));
    }

    #[test]
    fn test_decompress_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = vec![0u8; 300_000];
        rand::thread_rng().fill_bytes(&mut content);
        let (_, gz, res) = compress_to_temp(dir.path(), &content);

        let out = dir.path().join("out.img");
        let digest =
            decompress_file(&gz, &out, res.uncompressed_size, &CancellationToken::new()).unwrap();

        assert_eq!(digest, res.uncompressed_digest);
        assert_eq!(std::fs::read(&out).unwrap(), content);
        // Sidecar caches the verified digest.
        let sidecar = std::fs::read_to_string(digest_file_path(&out)).unwrap();
        assert_eq!(sidecar, digest.as_str());
    }

    #[test]
    fn test_decompress_sparse_content_keeps_logical_size() {
        let dir = tempfile::tempdir().unwrap();
        // Mostly zeros with data islands, like a fresh disk image.
        let mut content = vec![0u8; 1 << 20];
        content[0..16].copy_from_slice(b"headerheaderhead");
        content[700_000..700_004].copy_from_slice(b"data");
        let (_, gz, res) = compress_to_temp(dir.path(), &content);

        let out = dir.path().join("out.img");
        let digest =
            decompress_file(&gz, &out, res.uncompressed_size, &CancellationToken::new()).unwrap();

        assert_eq!(digest, Digest::from_bytes(&content));
        assert_eq!(std::fs::metadata(&out).unwrap().len(), content.len() as u64);
        assert_eq!(std::fs::read(&out).unwrap(), content);
    }

    #[test]
    fn test_decompress_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let content = vec![7u8; 100_000];
        let (_, gz, res) = compress_to_temp(dir.path(), &content);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = dir.path().join("out.img");
        let err = decompress_file(&gz, &out, res.uncompressed_size, &cancel).unwrap_err();
        assert!(matches!(err, crate::OciError::Common(CommonError::Cancelled)));
    }
}
