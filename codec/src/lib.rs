//! Record encoding (spec §2 component C2).
//!
//! Two codec families, matching how the teacher splits its own encoding:
//! zero-copy `rkyv` for the bulk of stored records (mirroring the pervasive
//! `rkyv::to_bytes`/`rkyv::access` usage across `mdbx-base` and `storage`),
//! and a plain `bincode`/`serde_json` codec for the small self-hosted
//! metadata table, which needs to stay readable across rkyv's wire-format
//! changes independent of application record layouts.

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("generation mismatch: stored {stored}, expected {expected}")]
    GenerationMismatch { stored: u32, expected: u32 },
}

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Fixed-size header written before every encoded payload (spec §3
/// `generation` tracking — lets a codec upgrade detect records written by
/// an older layout without touching the metadata table on every read).
const HEADER_LEN: usize = 4;

fn write_header(generation: u32, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&generation.to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn split_header(bytes: &[u8]) -> CodecResult<(u32, &[u8])> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Decode("buffer shorter than header".into()));
    }
    let (head, body) = bytes.split_at(HEADER_LEN);
    let generation = u32::from_be_bytes(head.try_into().unwrap());
    Ok((generation, body))
}

/// Encodes and decodes values of type `T`, prefixing every encoding with a
/// generation number (spec §3). Implementations own the choice of wire
/// format; callers never see raw bytes.
pub trait Codec<T> {
    /// The generation this codec instance writes. A stored record whose
    /// header generation differs is either an older layout (tolerated
    /// under `EvolutionStrategy::Standard`) or a hard mismatch.
    fn generation(&self) -> u32;

    fn encode(&self, value: &T) -> CodecResult<Vec<u8>>;

    /// Decodes a value, returning the generation the bytes were written
    /// with alongside it so callers can apply their evolution policy.
    fn decode(&self, bytes: &[u8]) -> CodecResult<(u32, T)>;
}

/// Default codec for application record types: zero-copy `rkyv` framing
/// with a generation header, mirroring `mdbx-base`'s
/// `rkyv::to_bytes::<rkyv::rancor::Error>` / `rkyv::access` round trip.
pub struct RkyvCodec<T> {
    generation: u32,
    _marker: std::marker::PhantomData<T>,
}

impl<T> RkyvCodec<T> {
    pub fn new(generation: u32) -> Self {
        Self {
            generation,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Codec<T> for RkyvCodec<T>
where
    T: Archive,
    T: for<'a> RkyvSerialize<rkyv::api::high::HighSerializer<AlignedVec, rkyv::ser::allocator::ArenaHandle<'a>, RkyvError>>,
    T::Archived: RkyvDeserialize<T, rkyv::api::high::HighDeserializer<RkyvError>>,
{
    fn generation(&self) -> u32 {
        self.generation
    }

    fn encode(&self, value: &T) -> CodecResult<Vec<u8>> {
        let bytes = rkyv::to_bytes::<RkyvError>(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(write_header(self.generation, &bytes))
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<(u32, T)> {
        let (generation, body) = split_header(bytes)?;
        let value: T = rkyv::from_bytes::<T, RkyvError>(body).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok((generation, value))
    }
}

/// Codec for the self-hosted metadata table (spec §3): plain `bincode` over
/// `serde`, independent of any application record's rkyv layout so the
/// metadata format can stay stable across rkyv version bumps.
pub struct MetadataCodec {
    generation: u32,
}

impl MetadataCodec {
    pub fn new(generation: u32) -> Self {
        Self { generation }
    }
}

impl<T> Codec<T> for MetadataCodec
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    fn generation(&self) -> u32 {
        self.generation
    }

    fn encode(&self, value: &T) -> CodecResult<Vec<u8>> {
        let body = bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(write_header(self.generation, &body))
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<(u32, T)> {
        let (generation, body) = split_header(bytes)?;
        let value = bincode::deserialize(body).map_err(|e| CodecError::Decode(e.to_string()))?;
        Ok((generation, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Meta {
        version: u32,
        name: String,
    }

    #[test]
    fn metadata_round_trip() {
        let codec = MetadataCodec::new(1);
        let value = Meta {
            version: 3,
            name: "Orders".into(),
        };
        let bytes = codec.encode(&value).unwrap();
        let (gen, decoded) = Codec::<Meta>::decode(&codec, &bytes).unwrap();
        assert_eq!(gen, 1);
        assert_eq!(decoded, value);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let codec = MetadataCodec::new(1);
        let err = Codec::<Meta>::decode(&codec, &[0, 1]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
