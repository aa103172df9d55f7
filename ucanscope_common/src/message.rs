//! Typed model of ucanto agent messages
//!
//! An agent message is a CAR root block of the form
//! `{"ucanto/message@7.0.0": {execute: [Link], report: {cid: Link}}}` whose
//! links point at UCAN delegations (invocations) and receipts in the same
//! block store.

use crate::car::{read_varint, BlockStore};
use crate::constants::{DID_CORE_CODE, MESSAGE_TAG};
use crate::ipld_json::to_json;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while reconstructing a message from its blocks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("block {0} not found")]
    MissingBlock(Cid),

    #[error("block {cid} is not valid DAG-CBOR: {reason}")]
    InvalidBlock { cid: Cid, reason: String },

    #[error("root block is not an agent message")]
    NotAMessage,

    #[error("invalid {kind} in block {cid}: {reason}")]
    Malformed {
        kind: &'static str,
        cid: Cid,
        reason: String,
    },
}

/// Content-addressed identifier, serialized in its string form
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Link(pub Cid);

impl Link {
    pub fn cid(&self) -> Cid {
        self.0
    }
}

impl From<Cid> for Link {
    fn from(cid: Cid) -> Self {
        Self(cid)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Link {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// A capability claim: action `can` on resource `with`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Capability {
    pub can: String,
    pub with: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nb: Option<Value>,
}

/// A UCAN delegation. Invocations share the same shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delegation {
    pub cid: Link,
    pub version: String,
    pub issuer: String,
    pub audience: String,
    pub capabilities: Vec<Capability>,
    pub proofs: Vec<Proof>,
    /// Unix seconds; `None` never expires
    pub expiration: Option<i64>,
    pub not_before: Option<i64>,
    pub nonce: Option<String>,
    pub facts: Vec<Value>,
}

pub type Invocation = Delegation;

/// Evidence backing a delegation or invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Proof {
    /// Delegation embedded in the same container
    Delegation(Arc<Delegation>),
    /// Reference to a delegation that is not in the container
    Link(Link),
}

impl Proof {
    pub fn link(&self) -> Link {
        match self {
            Proof::Delegation(delegation) => delegation.cid,
            Proof::Link(link) => *link,
        }
    }
}

/// A proof together with its nesting depth below the delegation it backs
#[derive(Debug, Clone, Copy)]
pub struct ProofNode<'a> {
    pub depth: usize,
    pub proof: &'a Proof,
}

impl Delegation {
    /// Flatten the proof DAG in pre-order, annotating each node with its depth
    ///
    /// Shared delegations are visited once per reference. The walk ends when
    /// every branch bottoms out in a link or a delegation without proofs.
    pub fn proof_tree(&self) -> Vec<ProofNode<'_>> {
        let mut nodes = Vec::new();
        let mut stack: Vec<ProofNode<'_>> = self
            .proofs
            .iter()
            .rev()
            .map(|proof| ProofNode { depth: 1, proof })
            .collect();

        while let Some(node) = stack.pop() {
            if let Proof::Delegation(delegation) = node.proof {
                stack.extend(delegation.proofs.iter().rev().map(|proof| ProofNode {
                    depth: node.depth + 1,
                    proof,
                }));
            }
            nodes.push(node);
        }

        nodes
    }
}

/// What a receipt ran
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Ran {
    Invocation(Arc<Invocation>),
    Link(Link),
}

/// Result recorded by a receipt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Value),
    Error(Value),
}

/// The recorded outcome of running an invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub link: Link,
    pub ran: Ran,
    pub out: Outcome,
    pub fork: Vec<Link>,
    pub join: Option<Link>,
    pub meta: Value,
    pub issuer: Option<String>,
    pub proofs: Vec<Proof>,
}

impl Receipt {
    pub fn is_ok(&self) -> bool {
        matches!(self.out, Outcome::Ok(_))
    }
}

/// Decoded content of an agent message container
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentMessage {
    pub root: Link,
    pub invocations: Vec<Arc<Invocation>>,
    /// Receipts keyed by the string form of the invocation they report on
    pub receipts: BTreeMap<String, Receipt>,
}

impl AgentMessage {
    /// Reconstruct the message rooted at `root`
    pub fn view(root: Cid, blocks: &BlockStore) -> Result<Self, MessageError> {
        let value = decode_block(blocks, root)?;
        let Ipld::Map(envelope) = &value else {
            return Err(MessageError::NotAMessage);
        };
        let body = envelope.get(MESSAGE_TAG).ok_or(MessageError::NotAMessage)?;
        let body = Fields::of(root, "message", body)?;

        let mut resolver = Resolver::new(blocks);

        let invocations = body
            .links("execute")?
            .into_iter()
            .map(|cid| resolver.delegation(cid))
            .collect::<Result<Vec<_>, _>>()?;

        let mut receipts = BTreeMap::new();
        if let Some(report) = body.get("report") {
            let Ipld::Map(report) = report else {
                return Err(body.malformed("report is not a map"));
            };
            for (invocation, link) in report {
                let Ipld::Link(cid) = link else {
                    return Err(body.malformed(format!("report for {} is not a link", invocation)));
                };
                receipts.insert(invocation.clone(), resolver.receipt(*cid)?);
            }
        }

        Ok(Self {
            root: Link(root),
            invocations,
            receipts,
        })
    }

    /// Capability actions of every invocation, in order
    pub fn capability_names(&self) -> Vec<&str> {
        self.invocations
            .iter()
            .flat_map(|invocation| invocation.capabilities.iter())
            .map(|capability| capability.can.as_str())
            .collect()
    }

    /// Comma separated capability actions, as shown in request lists
    pub fn capability_summary(&self) -> String {
        self.capability_names().join(", ")
    }

    pub fn receipt_for(&self, invocation: &Link) -> Option<&Receipt> {
        self.receipts.get(&invocation.to_string())
    }
}

fn decode_block(blocks: &BlockStore, cid: Cid) -> Result<Ipld, MessageError> {
    let bytes = blocks.get(&cid).ok_or(MessageError::MissingBlock(cid))?;
    serde_ipld_dagcbor::from_slice(bytes).map_err(|e| MessageError::InvalidBlock {
        cid,
        reason: e.to_string(),
    })
}

/// Render UCAN principal bytes as a DID
fn principal(bytes: &[u8]) -> String {
    match read_varint(bytes, 0) {
        Ok((DID_CORE_CODE, n)) => format!("did:{}", String::from_utf8_lossy(&bytes[n..])),
        _ => format!("did:key:z{}", bs58::encode(bytes).into_string()),
    }
}

/// Typed accessors over an IPLD map, reporting errors against a block
struct Fields<'a> {
    cid: Cid,
    kind: &'static str,
    map: &'a BTreeMap<String, Ipld>,
}

impl<'a> Fields<'a> {
    fn of(cid: Cid, kind: &'static str, value: &'a Ipld) -> Result<Self, MessageError> {
        match value {
            Ipld::Map(map) => Ok(Self { cid, kind, map }),
            _ => Err(MessageError::Malformed {
                kind,
                cid,
                reason: "expected a map".into(),
            }),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> MessageError {
        MessageError::Malformed {
            kind: self.kind,
            cid: self.cid,
            reason: reason.into(),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Ipld> {
        self.map.get(key)
    }

    fn nested(&self, key: &str) -> Result<Fields<'a>, MessageError> {
        let value = self
            .get(key)
            .ok_or_else(|| self.malformed(format!("missing `{}`", key)))?;
        Fields::of(self.cid, self.kind, value)
    }

    fn string(&self, key: &str) -> Result<&'a str, MessageError> {
        match self.get(key) {
            Some(Ipld::String(s)) => Ok(s),
            _ => Err(self.malformed(format!("`{}` must be a string", key))),
        }
    }

    fn optional_string(&self, key: &str) -> Result<Option<&'a str>, MessageError> {
        match self.get(key) {
            None | Some(Ipld::Null) => Ok(None),
            Some(Ipld::String(s)) => Ok(Some(s)),
            _ => Err(self.malformed(format!("`{}` must be a string", key))),
        }
    }

    fn bytes(&self, key: &str) -> Result<&'a [u8], MessageError> {
        match self.get(key) {
            Some(Ipld::Bytes(b)) => Ok(b),
            _ => Err(self.malformed(format!("`{}` must be bytes", key))),
        }
    }

    fn optional_int(&self, key: &str) -> Result<Option<i64>, MessageError> {
        match self.get(key) {
            None | Some(Ipld::Null) => Ok(None),
            Some(Ipld::Integer(i)) => i64::try_from(*i)
                .map(Some)
                .map_err(|_| self.malformed(format!("`{}` is out of range", key))),
            // JS encoders write an infinite expiry as a float
            Some(Ipld::Float(f)) if f.is_infinite() => Ok(None),
            _ => Err(self.malformed(format!("`{}` must be an integer", key))),
        }
    }

    fn list(&self, key: &str) -> Result<&'a [Ipld], MessageError> {
        match self.get(key) {
            None => Ok(&[]),
            Some(Ipld::List(items)) => Ok(items),
            _ => Err(self.malformed(format!("`{}` must be a list", key))),
        }
    }

    fn links(&self, key: &str) -> Result<Vec<Cid>, MessageError> {
        self.list(key)?
            .iter()
            .map(|item| match item {
                Ipld::Link(cid) => Ok(*cid),
                _ => Err(self.malformed(format!("`{}` must contain links", key))),
            })
            .collect()
    }

    fn optional_link(&self, key: &str) -> Result<Option<Cid>, MessageError> {
        match self.get(key) {
            None | Some(Ipld::Null) => Ok(None),
            Some(Ipld::Link(cid)) => Ok(Some(*cid)),
            _ => Err(self.malformed(format!("`{}` must be a link", key))),
        }
    }
}

/// Resolves links against the block store, sharing delegations by CID
struct Resolver<'a> {
    blocks: &'a BlockStore,
    resolved: HashMap<Cid, Result<Arc<Delegation>, MessageError>>,
    in_progress: HashSet<Cid>,
}

impl<'a> Resolver<'a> {
    fn new(blocks: &'a BlockStore) -> Self {
        Self {
            blocks,
            resolved: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    fn delegation(&mut self, cid: Cid) -> Result<Arc<Delegation>, MessageError> {
        if let Some(done) = self.resolved.get(&cid) {
            return done.clone();
        }
        if !self.in_progress.insert(cid) {
            return Err(MessageError::Malformed {
                kind: "delegation",
                cid,
                reason: "proof cycle".into(),
            });
        }

        let result = decode_block(self.blocks, cid)
            .and_then(|value| self.build_delegation(cid, &value))
            .map(Arc::new);

        self.in_progress.remove(&cid);
        self.resolved.insert(cid, result.clone());
        result
    }

    fn proof(&mut self, cid: Cid) -> Proof {
        match self.delegation(cid) {
            Ok(delegation) => Proof::Delegation(delegation),
            Err(_) => Proof::Link(Link(cid)),
        }
    }

    fn build_delegation(&mut self, cid: Cid, value: &Ipld) -> Result<Delegation, MessageError> {
        let fields = Fields::of(cid, "delegation", value)?;

        let version = fields.string("v")?.to_string();
        let issuer = principal(fields.bytes("iss")?);
        let audience = principal(fields.bytes("aud")?);
        // signature presence only; verification is out of scope
        fields.bytes("s")?;

        let capabilities = fields
            .list("att")?
            .iter()
            .map(|item| {
                let capability = Fields::of(cid, "capability", item)?;
                Ok(Capability {
                    can: capability.string("can")?.to_string(),
                    with: capability.string("with")?.to_string(),
                    nb: capability.get("nb").map(to_json),
                })
            })
            .collect::<Result<Vec<_>, MessageError>>()?;

        let expiration = fields.optional_int("exp")?;
        let not_before = fields.optional_int("nbf")?;
        let nonce = fields.optional_string("nnc")?.map(str::to_string);
        let facts = fields.list("fct")?.iter().map(to_json).collect();

        let proofs = fields
            .links("prf")?
            .into_iter()
            .map(|proof| self.proof(proof))
            .collect();

        Ok(Delegation {
            cid: Link(cid),
            version,
            issuer,
            audience,
            capabilities,
            proofs,
            expiration,
            not_before,
            nonce,
            facts,
        })
    }

    fn receipt(&mut self, cid: Cid) -> Result<Receipt, MessageError> {
        let value = decode_block(self.blocks, cid)?;
        let fields = Fields::of(cid, "receipt", &value)?;
        let ocm = fields.nested("ocm")?;

        let ran = match ocm.optional_link("ran")? {
            Some(ran) => match self.delegation(ran) {
                Ok(invocation) => Ran::Invocation(invocation),
                Err(_) => Ran::Link(Link(ran)),
            },
            None => return Err(ocm.malformed("missing `ran`")),
        };

        let out = ocm.nested("out")?;
        let out = match (out.get("ok"), out.get("error")) {
            (Some(ok), _) => Outcome::Ok(to_json(ok)),
            (None, Some(error)) => Outcome::Error(to_json(error)),
            (None, None) => return Err(out.malformed("`out` has neither ok nor error")),
        };

        let (fork, join) = match ocm.get("fx") {
            Some(_) => {
                let fx = ocm.nested("fx")?;
                (fx.links("fork")?, fx.optional_link("join")?)
            }
            None => (Vec::new(), None),
        };

        let meta = ocm
            .get("meta")
            .map(to_json)
            .unwrap_or_else(|| Value::Object(Default::default()));

        let issuer = match ocm.get("iss") {
            Some(Ipld::Bytes(bytes)) => Some(principal(bytes)),
            _ => None,
        };

        let proofs = ocm
            .links("prf")?
            .into_iter()
            .map(|proof| self.proof(proof))
            .collect();

        Ok(Receipt {
            link: Link(cid),
            ran,
            out,
            fork: fork.into_iter().map(Link).collect(),
            join: join.map(Link),
            meta,
            issuer,
            proofs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::car::CarFile;
    use crate::fixtures::{self, MessageBuilder};

    fn view(bytes: &[u8]) -> Result<AgentMessage, MessageError> {
        let car = CarFile::decode(bytes).unwrap();
        AgentMessage::view(car.roots[0], &car.blocks)
    }

    #[test]
    fn test_invocation_fields() {
        let mut builder = MessageBuilder::new();
        let invocation = builder.put(&fixtures::ucan(
            &fixtures::ed25519_principal(1),
            &fixtures::did_web("web.storage"),
            vec![fixtures::capability("store/add", "did:key:zSpace")],
            &[],
        ));
        builder.execute(invocation);

        let message = view(&builder.build()).unwrap();
        assert_eq!(message.invocations.len(), 1);

        let invocation = &message.invocations[0];
        assert!(invocation.issuer.starts_with("did:key:z"));
        assert_eq!(invocation.audience, "did:web:web.storage");
        assert_eq!(invocation.capabilities[0].can, "store/add");
        assert_eq!(invocation.capabilities[0].with, "did:key:zSpace");
        assert_eq!(invocation.expiration, None);
        assert_eq!(message.capability_summary(), "store/add");
    }

    #[test]
    fn test_nested_proofs_and_external_links() {
        let mut builder = MessageBuilder::new();
        let external = builder.detached(&fixtures::ucan(
            &fixtures::ed25519_principal(9),
            &fixtures::ed25519_principal(8),
            vec![fixtures::capability("*", "ucan:*")],
            &[],
        ));
        let root = builder.put(&fixtures::ucan(
            &fixtures::ed25519_principal(3),
            &fixtures::ed25519_principal(2),
            vec![fixtures::capability("store/*", "did:key:zSpace")],
            &[external],
        ));
        let middle = builder.put(&fixtures::ucan(
            &fixtures::ed25519_principal(2),
            &fixtures::ed25519_principal(1),
            vec![fixtures::capability("store/add", "did:key:zSpace")],
            &[root],
        ));
        let invocation = builder.put(&fixtures::ucan(
            &fixtures::ed25519_principal(1),
            &fixtures::did_web("web.storage"),
            vec![fixtures::capability("store/add", "did:key:zSpace")],
            &[middle],
        ));
        builder.execute(invocation);

        let message = view(&builder.build()).unwrap();
        let tree = message.invocations[0].proof_tree();
        let depths: Vec<usize> = tree.iter().map(|node| node.depth).collect();
        assert_eq!(depths, vec![1, 2, 3]);
        assert!(matches!(tree[0].proof, Proof::Delegation(_)));
        assert!(matches!(tree[1].proof, Proof::Delegation(_)));
        assert_eq!(tree[2].proof, &Proof::Link(Link(external)));
    }

    #[test]
    fn test_receipt_with_inline_invocation() {
        let mut builder = MessageBuilder::new();
        let invocation = builder.put(&fixtures::ucan(
            &fixtures::ed25519_principal(1),
            &fixtures::did_web("web.storage"),
            vec![fixtures::capability("upload/list", "did:key:zSpace")],
            &[],
        ));
        let receipt_cid = builder.put(&fixtures::receipt(
            invocation,
            Ok(Ipld::Map(BTreeMap::from([(
                "size".to_string(),
                Ipld::Integer(3),
            )]))),
        ));
        builder.report(invocation, receipt_cid);

        let message = view(&builder.build()).unwrap();
        assert!(message.invocations.is_empty());

        let receipt = message.receipt_for(&Link(invocation)).unwrap();
        assert!(receipt.is_ok());
        assert_eq!(receipt.link, Link(receipt_cid));
        assert_eq!(receipt.out, Outcome::Ok(serde_json::json!({ "size": 3 })));
        match &receipt.ran {
            Ran::Invocation(ran) => assert_eq!(ran.capabilities[0].can, "upload/list"),
            Ran::Link(_) => panic!("invocation block should resolve inline"),
        }
    }

    #[test]
    fn test_receipt_error_with_external_ran() {
        let mut builder = MessageBuilder::new();
        let missing = builder.detached(&Ipld::String("elsewhere".into()));
        let receipt = builder.put(&fixtures::receipt(
            missing,
            Err(Ipld::Map(BTreeMap::from([(
                "name".to_string(),
                Ipld::String("Unauthorized".into()),
            )]))),
        ));
        builder.report(missing, receipt);

        let message = view(&builder.build()).unwrap();
        let receipt = message.receipt_for(&Link(missing)).unwrap();
        assert!(!receipt.is_ok());
        assert_eq!(receipt.ran, Ran::Link(Link(missing)));
    }

    #[test]
    fn test_missing_invocation_block_is_an_error() {
        let mut builder = MessageBuilder::new();
        let missing = builder.detached(&Ipld::Null);
        builder.execute(missing);
        assert_eq!(
            view(&builder.build()),
            Err(MessageError::MissingBlock(missing))
        );
    }

    #[test]
    fn test_root_must_be_a_message() {
        let mut store = BlockStore::new();
        let root = store.put_cbor(&Ipld::String("nope".into())).unwrap();
        assert_eq!(
            AgentMessage::view(root, &store),
            Err(MessageError::NotAMessage)
        );
    }

    #[test]
    fn test_principal_rendering() {
        assert_eq!(principal(&fixtures::did_web("example.com")), "did:web:example.com");
        let key = principal(&fixtures::ed25519_principal(1));
        // ed25519 multicodec prefix always encodes to z6Mk
        assert!(key.starts_with("did:key:z6Mk"), "{}", key);
    }
}
