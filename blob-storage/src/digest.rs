use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use sha2::Digest;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Size of the buffer used when streaming bytes through the hashers.
const CHUNK_SIZE: usize = 64 * 1024;

/// Length of a hex encoded SHA-256 digest.
const CANONICAL_HEX_LEN: usize = 64;

/// Hash algorithms a client may declare a digest for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Md5,
        Algorithm::Sha1,
        Algorithm::Sha256,
        Algorithm::Sha512,
    ];

    /// Algorithm used to name blobs in the store.
    pub const CANONICAL: Algorithm = Algorithm::Sha256;

    /// The form field name used for declared digests of this algorithm.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Sha1 => "SHA1",
            Algorithm::Sha256 => "SHA256",
            Algorithm::Sha512 => "SHA512",
        }
    }

    fn hasher(&self) -> Hasher {
        match self {
            Algorithm::Md5 => Hasher::Md5(md5::Md5::new()),
            Algorithm::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            Algorithm::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_uppercase();
        match normalized.as_str() {
            "MD5" => Ok(Algorithm::Md5),
            "SHA1" => Ok(Algorithm::Sha1),
            "SHA256" => Ok(Algorithm::Sha256),
            "SHA512" => Ok(Algorithm::Sha512),
            _ => Err(format!("Unknown digest algorithm: {}", s)),
        }
    }
}

enum Hasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Feeds the same bytes through several hash algorithms at once.
pub struct MultiHasher {
    hashers: Vec<(Algorithm, Hasher)>,
    len: u64,
}

impl MultiHasher {
    /// Duplicate algorithms are only hashed once.
    pub fn new(algorithms: &[Algorithm]) -> Self {
        let mut hashers: Vec<(Algorithm, Hasher)> = Vec::with_capacity(algorithms.len());
        for algorithm in algorithms {
            if !hashers.iter().any(|(a, _)| a == algorithm) {
                hashers.push((*algorithm, algorithm.hasher()));
            }
        }
        Self { hashers, len: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, hasher) in self.hashers.iter_mut() {
            hasher.update(data);
        }
        self.len += data.len() as u64;
    }

    pub fn finish(self) -> Digests {
        let values = self
            .hashers
            .into_iter()
            .map(|(algorithm, hasher)| (algorithm, hasher.finalize_hex()))
            .collect();
        Digests {
            values,
            len: self.len,
        }
    }
}

/// Lower-case hex digests of one byte stream, keyed by algorithm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Digests {
    values: BTreeMap<Algorithm, String>,
    len: u64,
}

impl Digests {
    pub fn get(&self, algorithm: Algorithm) -> Option<&str> {
        self.values.get(&algorithm).map(|s| s.as_str())
    }

    /// Number of bytes that were hashed.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Algorithm, &str)> {
        self.values.iter().map(|(a, v)| (*a, v.as_str()))
    }
}

/// Whether `name` has the exact form the store gives blobs: lower-case hex of
/// the canonical algorithm's output.
pub fn is_canonical_digest(name: &str) -> bool {
    name.len() == CANONICAL_HEX_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Copies `reader` into `writer` while hashing, one chunk at a time.
///
/// Any read or write failure is returned as an error; a partial digest is never produced.
pub async fn copy_and_digest<R, W>(
    reader: &mut R,
    writer: &mut W,
    algorithms: &[Algorithm],
) -> Result<Digests>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut hasher = MultiHasher::new(algorithms);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n]).await?;
    }
    writer.flush().await?;
    Ok(hasher.finish())
}

/// Like [`copy_and_digest`], for bytes arriving as a stream of chunks.
pub async fn copy_stream_and_digest<S, W>(
    stream: S,
    writer: &mut W,
    algorithms: &[Algorithm],
) -> Result<Digests>
where
    S: Stream<Item = io::Result<Bytes>>,
    W: AsyncWrite + Unpin + ?Sized,
{
    futures::pin_mut!(stream);
    let mut hasher = MultiHasher::new(algorithms);
    while let Some(chunk) = stream.try_next().await? {
        hasher.update(&chunk);
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;
    Ok(hasher.finish())
}

/// Hashes everything `reader` yields.
pub async fn digest_reader<R>(reader: &mut R, algorithms: &[Algorithm]) -> Result<Digests>
where
    R: AsyncRead + Unpin + ?Sized,
{
    copy_and_digest(reader, &mut tokio::io::sink(), algorithms).await
}

/// Hashes the file at `path`.
pub async fn digest_file(path: &Path, algorithms: &[Algorithm]) -> Result<Digests> {
    let mut file = tokio::fs::File::open(path).await?;
    digest_reader(&mut file, algorithms).await
}
