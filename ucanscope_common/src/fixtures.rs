//! Builders for CAR-encoded agent messages used in tests

use crate::car::{write_varint, BlockStore, CarFile};
use crate::constants::{DID_CORE_CODE, MESSAGE_TAG};
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use std::collections::BTreeMap;

/// Principal bytes for an ed25519 did:key with a repeated-byte public key
pub fn ed25519_principal(seed: u8) -> Vec<u8> {
    let mut bytes = vec![0xed, 0x01];
    bytes.extend_from_slice(&[seed; 32]);
    bytes
}

/// Principal bytes for `did:web:<host>`
pub fn did_web(host: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    write_varint(&mut bytes, DID_CORE_CODE);
    bytes.extend_from_slice(format!("web:{}", host).as_bytes());
    bytes
}

pub fn capability(can: &str, with: &str) -> Ipld {
    Ipld::Map(BTreeMap::from([
        ("can".to_string(), Ipld::String(can.into())),
        ("with".to_string(), Ipld::String(with.into())),
    ]))
}

/// A UCAN delegation block without expiry
pub fn ucan(issuer: &[u8], audience: &[u8], capabilities: Vec<Ipld>, proofs: &[Cid]) -> Ipld {
    Ipld::Map(BTreeMap::from([
        ("v".to_string(), Ipld::String("0.9.1".into())),
        ("iss".to_string(), Ipld::Bytes(issuer.to_vec())),
        ("aud".to_string(), Ipld::Bytes(audience.to_vec())),
        ("s".to_string(), Ipld::Bytes(vec![0xd0, 0x1d, 0x00])),
        ("att".to_string(), Ipld::List(capabilities)),
        (
            "prf".to_string(),
            Ipld::List(proofs.iter().copied().map(Ipld::Link).collect()),
        ),
        ("exp".to_string(), Ipld::Null),
    ]))
}

/// A receipt block for `ran` with the given outcome
pub fn receipt(ran: Cid, out: Result<Ipld, Ipld>) -> Ipld {
    let out = match out {
        Ok(ok) => ("ok".to_string(), ok),
        Err(error) => ("error".to_string(), error),
    };
    let ocm = Ipld::Map(BTreeMap::from([
        ("ran".to_string(), Ipld::Link(ran)),
        ("out".to_string(), Ipld::Map(BTreeMap::from([out]))),
        (
            "fx".to_string(),
            Ipld::Map(BTreeMap::from([("fork".to_string(), Ipld::List(Vec::new()))])),
        ),
        ("meta".to_string(), Ipld::Map(BTreeMap::new())),
        ("prf".to_string(), Ipld::List(Vec::new())),
    ]));
    Ipld::Map(BTreeMap::from([
        ("ocm".to_string(), ocm),
        ("sig".to_string(), Ipld::Bytes(vec![0xd0, 0x1d, 0x00])),
    ]))
}

/// Assembles blocks and a message root into CAR bytes
#[derive(Debug, Default)]
pub struct MessageBuilder {
    blocks: BlockStore,
    execute: Vec<Cid>,
    report: BTreeMap<String, Ipld>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a block in the container
    pub fn put(&mut self, value: &Ipld) -> Cid {
        self.blocks.put_cbor(value).expect("fixture block encodes")
    }

    /// CID of a block that is left out of the container
    pub fn detached(&self, value: &Ipld) -> Cid {
        BlockStore::new()
            .put_cbor(value)
            .expect("fixture block encodes")
    }

    pub fn execute(&mut self, invocation: Cid) -> &mut Self {
        self.execute.push(invocation);
        self
    }

    pub fn report(&mut self, invocation: Cid, receipt: Cid) -> &mut Self {
        self.report
            .insert(invocation.to_string(), Ipld::Link(receipt));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut body = BTreeMap::new();
        if !self.execute.is_empty() {
            body.insert(
                "execute".to_string(),
                Ipld::List(self.execute.iter().copied().map(Ipld::Link).collect()),
            );
        }
        if !self.report.is_empty() {
            body.insert("report".to_string(), Ipld::Map(self.report.clone()));
        }
        let root = Ipld::Map(BTreeMap::from([(MESSAGE_TAG.to_string(), Ipld::Map(body))]));

        let mut blocks = self.blocks.clone();
        let root = blocks.put_cbor(&root).expect("fixture root encodes");
        CarFile::new(vec![root], blocks)
            .encode()
            .expect("fixture container encodes")
    }
}

/// CAR bytes of a message with one invocation claiming each of `cans`
pub fn message_with_capabilities(cans: &[&str]) -> Vec<u8> {
    let mut builder = MessageBuilder::new();
    let invocation = builder.put(&ucan(
        &ed25519_principal(1),
        &did_web("web.storage"),
        cans.iter()
            .map(|can| capability(can, "did:key:zSpace"))
            .collect(),
        &[],
    ));
    builder.execute(invocation);
    builder.build()
}
