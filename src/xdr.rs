//! Minimal XDR codec for challenge transactions.
//!
//! Covers exactly the envelope subset the auth flow signs and verifies:
//! ed25519 source accounts, manage-data operations, time-bound
//! preconditions, and decorated signatures on a v1 transaction envelope.
//! Fee-bump and legacy v0 envelopes are recognized by discriminant and
//! rejected.
//!
//! All integers are big-endian; variable-length fields are padded to a
//! 4-byte boundary with zero bytes, and the padding is enforced on decode.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::crypto::sha256;

// Union discriminants from the transaction wire format
const KEY_TYPE_ED25519: u32 = 0;
const ENVELOPE_TYPE_TX_V0: u32 = 0;
const ENVELOPE_TYPE_TX: u32 = 2;
const ENVELOPE_TYPE_TX_FEE_BUMP: u32 = 5;
const PRECOND_NONE: u32 = 0;
const PRECOND_TIME: u32 = 1;
const MEMO_NONE: u32 = 0;
const OP_MANAGE_DATA: u32 = 10;

/// Wire limits
const MAX_DATA_NAME_LEN: usize = 64;
const MAX_DATA_VALUE_LEN: usize = 64;
const MAX_SIGNATURE_LEN: usize = 64;
const MAX_OPERATIONS: usize = 100;
const MAX_SIGNATURES: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XdrError {
    UnexpectedEof,
    InvalidDiscriminant { field: &'static str, value: u32 },
    LengthExceeded { field: &'static str, len: usize, max: usize },
    NonZeroPadding,
    TrailingBytes(usize),
    InvalidUtf8,
    InvalidBase64,
    FeeBumpEnvelope,
    V0Envelope,
}

impl std::fmt::Display for XdrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of XDR input"),
            Self::InvalidDiscriminant { field, value } => {
                write!(f, "invalid discriminant {} for {}", value, field)
            }
            Self::LengthExceeded { field, len, max } => {
                write!(f, "{} length {} exceeds maximum {}", field, len, max)
            }
            Self::NonZeroPadding => write!(f, "non-zero XDR padding"),
            Self::TrailingBytes(n) => write!(f, "{} trailing bytes after envelope", n),
            Self::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
            Self::InvalidBase64 => write!(f, "envelope is not valid base64"),
            Self::FeeBumpEnvelope => write!(f, "fee-bump envelopes are not supported"),
            Self::V0Envelope => write!(f, "legacy v0 envelopes are not supported"),
        }
    }
}

impl std::error::Error for XdrError {}

struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn put_fixed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Variable-length opaque: length prefix + data + zero padding to 4 bytes.
    fn put_var(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        let pad = (4 - bytes.len() % 4) % 4;
        self.buf.extend_from_slice(&[0u8; 3][..pad]);
    }

    fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

struct XdrReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> XdrReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], XdrError> {
        if self.pos + n > self.data.len() {
            return Err(XdrError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn get_u32(&mut self) -> Result<u32, XdrError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn get_u64(&mut self) -> Result<u64, XdrError> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn get_i64(&mut self) -> Result<i64, XdrError> {
        let bytes = self.take(8)?;
        Ok(i64::from_be_bytes(bytes.try_into().unwrap()))
    }

    fn get_fixed(&mut self, n: usize) -> Result<&'a [u8], XdrError> {
        self.take(n)
    }

    fn get_var(&mut self, field: &'static str, max: usize) -> Result<Vec<u8>, XdrError> {
        let len = self.get_u32()? as usize;
        if len > max {
            return Err(XdrError::LengthExceeded { field, len, max });
        }
        let data = self.take(len)?.to_vec();
        let pad = (4 - len % 4) % 4;
        let padding = self.take(pad)?;
        if padding.iter().any(|&b| b != 0) {
            return Err(XdrError::NonZeroPadding);
        }
        Ok(data)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// An ed25519 account on the wire. Multiplexed account ids are not used by
/// challenge transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    fn encode(&self, w: &mut XdrWriter) {
        w.put_u32(KEY_TYPE_ED25519);
        w.put_fixed(&self.0);
    }

    fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let discriminant = r.get_u32()?;
        if discriminant != KEY_TYPE_ED25519 {
            return Err(XdrError::InvalidDiscriminant {
                field: "account id",
                value: discriminant,
            });
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(r.get_fixed(32)?);
        Ok(Self(key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub min_time: u64,
    pub max_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preconditions {
    None,
    Time(TimeBounds),
}

impl Preconditions {
    fn encode(&self, w: &mut XdrWriter) {
        match self {
            Self::None => w.put_u32(PRECOND_NONE),
            Self::Time(tb) => {
                w.put_u32(PRECOND_TIME);
                w.put_u64(tb.min_time);
                w.put_u64(tb.max_time);
            }
        }
    }

    fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        match r.get_u32()? {
            PRECOND_NONE => Ok(Self::None),
            PRECOND_TIME => Ok(Self::Time(TimeBounds {
                min_time: r.get_u64()?,
                max_time: r.get_u64()?,
            })),
            value => Err(XdrError::InvalidDiscriminant {
                field: "preconditions",
                value,
            }),
        }
    }
}

/// The manage-data operation body: a named entry with an optional value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManageDataOp {
    pub name: String,
    pub value: Option<Vec<u8>>,
}

/// An operation with an optional source-account override. Challenge
/// transactions carry manage-data bodies only; any other body type fails
/// decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub source_account: Option<AccountId>,
    pub body: ManageDataOp,
}

impl Operation {
    fn encode(&self, w: &mut XdrWriter) {
        match &self.source_account {
            Some(account) => {
                w.put_u32(1);
                account.encode(w);
            }
            None => w.put_u32(0),
        }
        w.put_u32(OP_MANAGE_DATA);
        w.put_var(self.body.name.as_bytes());
        match &self.body.value {
            Some(value) => {
                w.put_u32(1);
                w.put_var(value);
            }
            None => w.put_u32(0),
        }
    }

    fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let source_account = match r.get_u32()? {
            0 => None,
            1 => Some(AccountId::decode(r)?),
            value => {
                return Err(XdrError::InvalidDiscriminant {
                    field: "operation source option",
                    value,
                })
            }
        };
        let op_type = r.get_u32()?;
        if op_type != OP_MANAGE_DATA {
            return Err(XdrError::InvalidDiscriminant {
                field: "operation type",
                value: op_type,
            });
        }
        let name_bytes = r.get_var("data name", MAX_DATA_NAME_LEN)?;
        let name = String::from_utf8(name_bytes).map_err(|_| XdrError::InvalidUtf8)?;
        let value = match r.get_u32()? {
            0 => None,
            1 => Some(r.get_var("data value", MAX_DATA_VALUE_LEN)?),
            value => {
                return Err(XdrError::InvalidDiscriminant {
                    field: "data value option",
                    value,
                })
            }
        };
        Ok(Self {
            source_account,
            body: ManageDataOp { name, value },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub source_account: AccountId,
    pub fee: u32,
    pub seq_num: i64,
    pub cond: Preconditions,
    pub operations: Vec<Operation>,
}

impl Transaction {
    fn encode(&self, w: &mut XdrWriter) {
        self.source_account.encode(w);
        w.put_u32(self.fee);
        w.put_i64(self.seq_num);
        self.cond.encode(w);
        w.put_u32(MEMO_NONE);
        w.put_u32(self.operations.len() as u32);
        for op in &self.operations {
            op.encode(w);
        }
        // ext: reserved, always version 0
        w.put_u32(0);
    }

    fn decode(r: &mut XdrReader) -> Result<Self, XdrError> {
        let source_account = AccountId::decode(r)?;
        let fee = r.get_u32()?;
        let seq_num = r.get_i64()?;
        let cond = Preconditions::decode(r)?;
        let memo = r.get_u32()?;
        if memo != MEMO_NONE {
            return Err(XdrError::InvalidDiscriminant {
                field: "memo",
                value: memo,
            });
        }
        let op_count = r.get_u32()? as usize;
        if op_count > MAX_OPERATIONS {
            return Err(XdrError::LengthExceeded {
                field: "operations",
                len: op_count,
                max: MAX_OPERATIONS,
            });
        }
        let mut operations = Vec::with_capacity(op_count);
        for _ in 0..op_count {
            operations.push(Operation::decode(r)?);
        }
        let ext = r.get_u32()?;
        if ext != 0 {
            return Err(XdrError::InvalidDiscriminant {
                field: "transaction ext",
                value: ext,
            });
        }
        Ok(Self {
            source_account,
            fee,
            seq_num,
            cond,
            operations,
        })
    }

    pub fn to_xdr(&self) -> Vec<u8> {
        let mut w = XdrWriter::new();
        self.encode(&mut w);
        w.into_inner()
    }

    /// Network-bound transaction hash: the digest that gets signed.
    ///
    /// hash = SHA-256( SHA-256(passphrase) ‖ envelope_type_tx ‖ tx_body )
    pub fn hash(&self, network_passphrase: &str) -> [u8; 32] {
        let network_id = sha256(network_passphrase.as_bytes());
        let mut payload = Vec::with_capacity(36 + 128);
        payload.extend_from_slice(&network_id);
        payload.extend_from_slice(&ENVELOPE_TYPE_TX.to_be_bytes());
        payload.extend_from_slice(&self.to_xdr());
        sha256(&payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratedSignature {
    /// Trailing four bytes of the signer's public key.
    pub hint: [u8; 4],
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionEnvelope {
    pub tx: Transaction,
    pub signatures: Vec<DecoratedSignature>,
}

impl TransactionEnvelope {
    pub fn new(tx: Transaction) -> Self {
        Self {
            tx,
            signatures: Vec::new(),
        }
    }

    pub fn to_xdr(&self) -> Vec<u8> {
        let mut w = XdrWriter::new();
        w.put_u32(ENVELOPE_TYPE_TX);
        self.tx.encode(&mut w);
        w.put_u32(self.signatures.len() as u32);
        for sig in &self.signatures {
            w.put_fixed(&sig.hint);
            w.put_var(&sig.signature);
        }
        w.into_inner()
    }

    pub fn from_xdr(data: &[u8]) -> Result<Self, XdrError> {
        let mut r = XdrReader::new(data);
        let envelope_type = r.get_u32()?;
        match envelope_type {
            ENVELOPE_TYPE_TX => {}
            ENVELOPE_TYPE_TX_FEE_BUMP => return Err(XdrError::FeeBumpEnvelope),
            ENVELOPE_TYPE_TX_V0 => return Err(XdrError::V0Envelope),
            value => {
                return Err(XdrError::InvalidDiscriminant {
                    field: "envelope type",
                    value,
                })
            }
        }
        let tx = Transaction::decode(&mut r)?;
        let sig_count = r.get_u32()? as usize;
        if sig_count > MAX_SIGNATURES {
            return Err(XdrError::LengthExceeded {
                field: "signatures",
                len: sig_count,
                max: MAX_SIGNATURES,
            });
        }
        let mut signatures = Vec::with_capacity(sig_count);
        for _ in 0..sig_count {
            let mut hint = [0u8; 4];
            hint.copy_from_slice(r.get_fixed(4)?);
            let signature = r.get_var("signature", MAX_SIGNATURE_LEN)?;
            signatures.push(DecoratedSignature { hint, signature });
        }
        if r.remaining() > 0 {
            return Err(XdrError::TrailingBytes(r.remaining()));
        }
        Ok(Self { tx, signatures })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_xdr())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, XdrError> {
        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|_| XdrError::InvalidBase64)?;
        Self::from_xdr(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            source_account: AccountId([1u8; 32]),
            fee: 100,
            seq_num: 0,
            cond: Preconditions::Time(TimeBounds {
                min_time: 1_700_000_000,
                max_time: 1_700_000_300,
            }),
            operations: vec![
                Operation {
                    source_account: Some(AccountId([2u8; 32])),
                    body: ManageDataOp {
                        name: "example.com auth".to_string(),
                        value: Some(b"nonce-bytes".to_vec()),
                    },
                },
                Operation {
                    source_account: Some(AccountId([1u8; 32])),
                    body: ManageDataOp {
                        name: "web_auth_domain".to_string(),
                        value: Some(b"example.com".to_vec()),
                    },
                },
            ],
        }
    }

    #[test]
    fn test_envelope_roundtrip() {
        let mut envelope = TransactionEnvelope::new(sample_tx());
        envelope.signatures.push(DecoratedSignature {
            hint: [9, 8, 7, 6],
            signature: vec![0xAA; 64],
        });

        let encoded = envelope.to_base64();
        let decoded = TransactionEnvelope::from_base64(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_unsigned_envelope_roundtrip() {
        let envelope = TransactionEnvelope::new(sample_tx());
        let decoded = TransactionEnvelope::from_xdr(&envelope.to_xdr()).unwrap();
        assert_eq!(decoded.signatures.len(), 0);
        assert_eq!(decoded.tx, envelope.tx);
    }

    #[test]
    fn test_fee_bump_rejected() {
        let mut w = XdrWriter::new();
        w.put_u32(ENVELOPE_TYPE_TX_FEE_BUMP);
        let err = TransactionEnvelope::from_xdr(&w.into_inner()).unwrap_err();
        assert_eq!(err, XdrError::FeeBumpEnvelope);
    }

    #[test]
    fn test_v0_rejected() {
        let mut w = XdrWriter::new();
        w.put_u32(ENVELOPE_TYPE_TX_V0);
        let err = TransactionEnvelope::from_xdr(&w.into_inner()).unwrap_err();
        assert_eq!(err, XdrError::V0Envelope);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = TransactionEnvelope::new(sample_tx()).to_xdr();
        bytes.push(0);
        assert!(matches!(
            TransactionEnvelope::from_xdr(&bytes),
            Err(XdrError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let bytes = TransactionEnvelope::new(sample_tx()).to_xdr();
        let err = TransactionEnvelope::from_xdr(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err, XdrError::UnexpectedEof);
    }

    #[test]
    fn test_nonzero_padding_rejected() {
        // "web_auth_domain" is 15 bytes, so its final padding byte sits
        // immediately before the value option discriminant of op #2.
        let envelope = TransactionEnvelope::new(sample_tx());
        let mut bytes = envelope.to_xdr();
        let name = b"web_auth_domain";
        let pos = bytes
            .windows(name.len())
            .position(|w| w == name)
            .expect("name present");
        bytes[pos + name.len()] = 0xFF; // corrupt the pad byte
        assert!(matches!(
            TransactionEnvelope::from_xdr(&bytes),
            Err(XdrError::NonZeroPadding)
        ));
    }

    #[test]
    fn test_var_encoding_layout() {
        let mut w = XdrWriter::new();
        w.put_var(b"abcde");
        // length prefix 5, five data bytes, three zero pad bytes
        assert_eq!(
            w.into_inner(),
            vec![0, 0, 0, 5, b'a', b'b', b'c', b'd', b'e', 0, 0, 0]
        );
    }

    #[test]
    fn test_hash_is_network_bound() {
        let tx = sample_tx();
        let testnet = tx.hash("Test SDF Network ; September 2015");
        let pubnet = tx.hash("Public Global Stellar Network ; September 2015");
        assert_ne!(testnet, pubnet);
    }

    #[test]
    fn test_hash_ignores_signatures() {
        let tx = sample_tx();
        let mut envelope = TransactionEnvelope::new(tx.clone());
        let before = envelope.tx.hash("net");
        envelope.signatures.push(DecoratedSignature {
            hint: [0; 4],
            signature: vec![1; 64],
        });
        assert_eq!(envelope.tx.hash("net"), before);
    }

    #[test]
    fn test_data_name_limit_enforced() {
        let mut tx = sample_tx();
        tx.operations[0].body.name = "x".repeat(65);
        let envelope = TransactionEnvelope::new(tx);
        assert!(matches!(
            TransactionEnvelope::from_xdr(&envelope.to_xdr()),
            Err(XdrError::LengthExceeded { field: "data name", .. })
        ));
    }

    #[test]
    fn test_value_none_roundtrip() {
        let mut tx = sample_tx();
        tx.operations[0].body.value = None;
        tx.operations[0].source_account = None;
        let envelope = TransactionEnvelope::new(tx);
        let decoded = TransactionEnvelope::from_xdr(&envelope.to_xdr()).unwrap();
        assert_eq!(decoded.tx.operations[0].body.value, None);
        assert_eq!(decoded.tx.operations[0].source_account, None);
    }
}
