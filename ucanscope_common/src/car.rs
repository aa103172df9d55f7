//! CAR v1 container reader and writer
//!
//! A CAR file is a varint-prefixed DAG-CBOR header (`{version, roots}`)
//! followed by sections of `varint(len) || CID || block bytes`. Block hashes
//! are not verified.

use crate::constants::{DAG_CBOR_CODEC, SHA2_256_CODE};
use ipld_core::cid::multihash::Multihash;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use thiserror::Error;

/// Longest unsigned varint accepted by multiformats
const MAX_VARINT_LEN: usize = 9;

/// Length of a CIDv0 (bare sha2-256 multihash)
const CID_V0_LEN: usize = 34;

/// Container errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CarError {
    #[error("unexpected end of input at offset {0}")]
    Truncated(usize),

    #[error("varint at offset {0} is longer than 9 bytes")]
    VarintOverflow(usize),

    #[error("invalid CAR header: {0}")]
    InvalidHeader(String),

    #[error("unsupported CAR version {0}")]
    UnsupportedVersion(i128),

    #[error("invalid CID at offset {offset}: {reason}")]
    InvalidCid { offset: usize, reason: String },

    #[error("failed to encode block: {0}")]
    Encode(String),
}

/// Read an unsigned LEB128 varint, returning the value and its encoded length
pub(crate) fn read_varint(bytes: &[u8], offset: usize) -> Result<(u64, usize), CarError> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = *bytes.get(offset + i).ok_or(CarError::Truncated(offset + i))?;
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CarError::VarintOverflow(offset))
}

pub(crate) fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn to_len(value: u64, offset: usize) -> Result<usize, CarError> {
    usize::try_from(value).map_err(|_| CarError::Truncated(offset))
}

/// Byte length of the CID starting at `offset`
fn cid_length(bytes: &[u8], offset: usize) -> Result<usize, CarError> {
    if bytes.get(offset) == Some(&0x12) && bytes.get(offset + 1) == Some(&0x20) {
        return Ok(CID_V0_LEN);
    }

    let mut cursor = offset;
    let (version, n) = read_varint(bytes, cursor)?;
    if version != 1 {
        return Err(CarError::InvalidCid {
            offset,
            reason: format!("unsupported CID version {}", version),
        });
    }
    cursor += n;

    // codec, hash function, digest size
    let (_, n) = read_varint(bytes, cursor)?;
    cursor += n;
    let (_, n) = read_varint(bytes, cursor)?;
    cursor += n;
    let (digest_len, n) = read_varint(bytes, cursor)?;
    cursor += n;

    let end = cursor
        .checked_add(to_len(digest_len, cursor)?)
        .ok_or(CarError::Truncated(cursor))?;
    Ok(end - offset)
}

/// Content-addressed block storage keyed by CID
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStore {
    blocks: BTreeMap<Cid, Vec<u8>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cid: &Cid) -> Option<&[u8]> {
        self.blocks.get(cid).map(Vec::as_slice)
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.blocks.contains_key(cid)
    }

    pub fn insert(&mut self, cid: Cid, bytes: Vec<u8>) {
        self.blocks.insert(cid, bytes);
    }

    /// Encode a value as DAG-CBOR and store it under its sha2-256 CIDv1
    pub fn put_cbor(&mut self, value: &Ipld) -> Result<Cid, CarError> {
        let bytes =
            serde_ipld_dagcbor::to_vec(value).map_err(|e| CarError::Encode(e.to_string()))?;
        let digest = Sha256::digest(&bytes);
        let hash = Multihash::<64>::wrap(SHA2_256_CODE, &digest)
            .map_err(|e| CarError::Encode(e.to_string()))?;
        let cid = Cid::new_v1(DAG_CBOR_CODEC, hash);
        self.blocks.insert(cid, bytes);
        Ok(cid)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Cid, &[u8])> {
        self.blocks.iter().map(|(cid, bytes)| (cid, bytes.as_slice()))
    }
}

/// A decoded CAR v1 file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CarFile {
    pub roots: Vec<Cid>,
    pub blocks: BlockStore,
}

impl CarFile {
    pub fn new(roots: Vec<Cid>, blocks: BlockStore) -> Self {
        Self { roots, blocks }
    }

    /// Parse a CAR v1 byte sequence
    pub fn decode(bytes: &[u8]) -> Result<Self, CarError> {
        let (header_len, n) = read_varint(bytes, 0)?;
        let header_end = n
            .checked_add(to_len(header_len, 0)?)
            .filter(|end| *end <= bytes.len())
            .ok_or(CarError::Truncated(bytes.len()))?;

        let header: Ipld = serde_ipld_dagcbor::from_slice(&bytes[n..header_end])
            .map_err(|e| CarError::InvalidHeader(e.to_string()))?;
        let roots = parse_header(&header)?;

        let mut blocks = BlockStore::new();
        let mut offset = header_end;
        while offset < bytes.len() {
            let (section_len, n) = read_varint(bytes, offset)?;
            let start = offset + n;
            let end = start
                .checked_add(to_len(section_len, start)?)
                .filter(|end| *end <= bytes.len())
                .ok_or(CarError::Truncated(bytes.len()))?;

            // Reads past the section boundary surface as truncation
            let section = &bytes[..end];
            let cid_len = cid_length(section, start)?;
            if start + cid_len > end {
                return Err(CarError::Truncated(end));
            }
            let cid = Cid::try_from(&section[start..start + cid_len]).map_err(|e| {
                CarError::InvalidCid {
                    offset: start,
                    reason: e.to_string(),
                }
            })?;

            blocks.insert(cid, section[start + cid_len..].to_vec());
            offset = end;
        }

        Ok(Self { roots, blocks })
    }

    /// Serialize to CAR v1 bytes
    pub fn encode(&self) -> Result<Vec<u8>, CarError> {
        let header = Ipld::Map(BTreeMap::from([
            (
                "roots".to_string(),
                Ipld::List(self.roots.iter().copied().map(Ipld::Link).collect()),
            ),
            ("version".to_string(), Ipld::Integer(1)),
        ]));
        let header =
            serde_ipld_dagcbor::to_vec(&header).map_err(|e| CarError::Encode(e.to_string()))?;

        let mut out = Vec::new();
        write_varint(&mut out, header.len() as u64);
        out.extend_from_slice(&header);

        for (cid, data) in self.blocks.iter() {
            let cid_bytes = cid.to_bytes();
            write_varint(&mut out, (cid_bytes.len() + data.len()) as u64);
            out.extend_from_slice(&cid_bytes);
            out.extend_from_slice(data);
        }

        Ok(out)
    }
}

fn parse_header(header: &Ipld) -> Result<Vec<Cid>, CarError> {
    let Ipld::Map(fields) = header else {
        return Err(CarError::InvalidHeader("header is not a map".into()));
    };

    match fields.get("version") {
        Some(Ipld::Integer(1)) => {}
        Some(Ipld::Integer(version)) => return Err(CarError::UnsupportedVersion(*version)),
        _ => return Err(CarError::InvalidHeader("missing version".into())),
    }

    match fields.get("roots") {
        Some(Ipld::List(roots)) => roots
            .iter()
            .map(|root| match root {
                Ipld::Link(cid) => Ok(*cid),
                _ => Err(CarError::InvalidHeader("root is not a link".into())),
            })
            .collect(),
        _ => Err(CarError::InvalidHeader("missing roots".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> (BlockStore, Cid) {
        let mut store = BlockStore::new();
        let cid = store
            .put_cbor(&Ipld::Map(BTreeMap::from([(
                "hello".to_string(),
                Ipld::String("world".into()),
            )])))
            .unwrap();
        (store, cid)
    }

    #[test]
    fn test_varint() {
        let mut out = Vec::new();
        write_varint(&mut out, 300);
        assert_eq!(out, vec![0xac, 0x02]);
        assert_eq!(read_varint(&out, 0).unwrap(), (300, 2));

        assert_eq!(read_varint(&[0x80], 0), Err(CarError::Truncated(1)));
        assert_eq!(read_varint(&[0xff; 10], 0), Err(CarError::VarintOverflow(0)));
    }

    #[test]
    fn test_decode_encoded_file() {
        let (blocks, root) = sample_store();
        let car = CarFile::new(vec![root], blocks);
        let bytes = car.encode().unwrap();

        let decoded = CarFile::decode(&bytes).unwrap();
        assert_eq!(decoded.roots, vec![root]);
        assert_eq!(decoded.blocks.len(), 1);
        assert!(decoded.blocks.contains(&root));
        assert_eq!(decoded, car);
    }

    #[test]
    fn test_decode_zero_roots_is_valid_container() {
        let car = CarFile::new(Vec::new(), BlockStore::new());
        let decoded = CarFile::decode(&car.encode().unwrap()).unwrap();
        assert!(decoded.roots.is_empty());
        assert!(decoded.blocks.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(CarFile::decode(&[]).is_err());
        assert!(CarFile::decode(b"definitely not a car file").is_err());
        assert!(matches!(
            CarFile::decode(&[0x05, 0xa1]),
            Err(CarError::Truncated(_))
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_section() {
        let (blocks, root) = sample_store();
        let bytes = CarFile::new(vec![root], blocks).encode().unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(CarFile::decode(cut), Err(CarError::Truncated(_))));
    }

    #[test]
    fn test_decode_rejects_version_two() {
        let header = serde_ipld_dagcbor::to_vec(&Ipld::Map(BTreeMap::from([(
            "version".to_string(),
            Ipld::Integer(2),
        )])))
        .unwrap();
        let mut bytes = Vec::new();
        write_varint(&mut bytes, header.len() as u64);
        bytes.extend_from_slice(&header);

        assert_eq!(
            CarFile::decode(&bytes),
            Err(CarError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_cid_v0_length() {
        let mut bytes = vec![0x12, 0x20];
        bytes.extend_from_slice(&[7u8; 32]);
        assert_eq!(cid_length(&bytes, 0).unwrap(), CID_V0_LEN);
    }
}
