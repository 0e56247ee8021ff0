//! Ledger primitives and their conversions into the ledger's packed layouts.
//!
//! Capacity is measured in shannons. A cell occupies one byte of capacity
//! ([`ONE_CKB`] shannons) for every byte of its capacity field, scripts and data.

use std::fmt;

use ckb_types::bytes::Bytes;
use ckb_types::packed;
use ckb_types::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SporeError;

/// Shannons in one whole capacity unit. Also the price of one occupied byte.
pub const ONE_CKB: u64 = 100_000_000;

/// Bytes taken by the capacity field of every cell.
const CAPACITY_FIELD_BYTES: u64 = 8;

pub type Byte32 = [u8; 32];

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HashType {
    #[default]
    Data,
    Type,
    Data1,
    Data2,
}

impl HashType {
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Type => 1,
            Self::Data1 => 2,
            Self::Data2 => 4,
        }
    }

    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Data),
            1 => Some(Self::Type),
            2 => Some(Self::Data1),
            4 => Some(Self::Data2),
            _ => None,
        }
    }
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Script {
    #[serde(with = "hex_byte32")]
    pub code_hash: Byte32,
    pub hash_type: HashType,
    #[serde(with = "hex_bytes")]
    pub args: Vec<u8>,
}

impl Script {
    #[must_use]
    pub const fn new(code_hash: Byte32, hash_type: HashType, args: Vec<u8>) -> Self {
        Self {
            code_hash,
            hash_type,
            args,
        }
    }

    /// Whether `other` runs the same code, regardless of args.
    #[must_use]
    pub fn same_code(&self, other: &Self) -> bool {
        self.code_hash == other.code_hash && self.hash_type == other.hash_type
    }

    #[must_use]
    pub fn occupied_bytes(&self) -> u64 {
        32 + 1 + self.args.len() as u64
    }

    /// Bytes of the packed script layout, the preimage of its hash.
    #[must_use]
    pub fn pack(&self) -> Vec<u8> {
        packed::Script::from(self).as_slice().to_vec()
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct OutPoint {
    #[serde(with = "hex_byte32")]
    pub tx_hash: Byte32,
    pub index: u32,
}

impl OutPoint {
    #[must_use]
    pub const fn new(tx_hash: Byte32, index: u32) -> Self {
        Self { tx_hash, index }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}:{}", hex::encode(self.tx_hash), self.index)
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DepType {
    #[default]
    Code,
    DepGroup,
}

impl DepType {
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Code => 0,
            Self::DepGroup => 1,
        }
    }
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: DepType,
}

impl CellDep {
    #[must_use]
    pub const fn new(out_point: OutPoint, dep_type: DepType) -> Self {
        Self {
            out_point,
            dep_type,
        }
    }
}

/// A cell: capacity, ownership, optional type and payload.
///
/// `out_point` is set for cells that already live on the ledger and unset for
/// cells being created by the transaction under assembly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    pub capacity: u64,
    pub lock: Script,
    pub type_script: Option<Script>,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub out_point: Option<OutPoint>,
}

impl Cell {
    #[must_use]
    pub const fn new(capacity: u64, lock: Script, type_script: Option<Script>, data: Vec<u8>) -> Self {
        Self {
            capacity,
            lock,
            type_script,
            data,
            out_point: None,
        }
    }

    #[must_use]
    pub fn with_out_point(mut self, out_point: OutPoint) -> Self {
        self.out_point = Some(out_point);
        self
    }

    /// Bytes this cell occupies on the ledger.
    #[must_use]
    pub fn occupied_bytes(&self) -> u64 {
        CAPACITY_FIELD_BYTES
            + self.lock.occupied_bytes()
            + self.type_script.as_ref().map_or(0, Script::occupied_bytes)
            + self.data.len() as u64
    }

    /// Minimum capacity the cell must declare, in shannons.
    pub fn occupied_capacity(&self) -> Result<u64, SporeError> {
        self.occupied_bytes().checked_mul(ONE_CKB).ok_or_else(|| {
            SporeError::CapacityOverflow(format!(
                "occupied capacity overflow for a cell of {} bytes",
                self.occupied_bytes()
            ))
        })
    }

    /// Capacity above the occupied minimum, or zero when under-funded.
    pub fn free_capacity(&self) -> Result<u64, SporeError> {
        Ok(self.capacity.saturating_sub(self.occupied_capacity()?))
    }

    /// Whether the cell carries no type script and no data.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        self.type_script.is_none() && self.data.is_empty()
    }

    /// The output part of the cell (capacity, lock, type). Data travels separately.
    #[must_use]
    pub fn to_output(&self) -> packed::CellOutput {
        packed::CellOutput::new_builder()
            .capacity(self.capacity.pack())
            .lock(packed::Script::from(&self.lock))
            .type_(
                packed::ScriptOpt::new_builder()
                    .set(self.type_script.as_ref().map(packed::Script::from))
                    .build(),
            )
            .build()
    }
}

/// Standard witness layout: a lock signature plus optional type-script payloads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessArgs {
    pub lock: Option<Vec<u8>>,
    pub input_type: Option<Vec<u8>>,
    pub output_type: Option<Vec<u8>>,
}

impl WitnessArgs {
    /// Signature size reserved by the default placeholder.
    pub const SIGNATURE_PLACEHOLDER_SIZE: usize = 65;

    /// A witness with a zeroed lock field, sized for one recoverable signature.
    #[must_use]
    pub fn placeholder() -> Self {
        Self {
            lock: Some(vec![0; Self::SIGNATURE_PLACEHOLDER_SIZE]),
            input_type: None,
            output_type: None,
        }
    }

    /// True when only the lock field is set and it holds zero bytes.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.input_type.is_none()
            && self.output_type.is_none()
            && self
                .lock
                .as_ref()
                .is_some_and(|lock| lock.iter().all(|byte| *byte == 0))
    }

    #[must_use]
    pub fn pack(&self) -> Vec<u8> {
        let field = |value: &Option<Vec<u8>>| {
            packed::BytesOpt::new_builder()
                .set(value.as_ref().map(|bytes| Bytes::from(bytes.clone()).pack()))
                .build()
        };
        packed::WitnessArgs::new_builder()
            .lock(field(&self.lock))
            .input_type(field(&self.input_type))
            .output_type(field(&self.output_type))
            .build()
            .as_slice()
            .to_vec()
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, SporeError> {
        let witness = packed::WitnessArgs::from_slice(bytes)
            .map_err(|err| SporeError::MalformedWitness(format!("witness args: {err}")))?;
        let field = |value: packed::BytesOpt| value.to_opt().map(|bytes| bytes.raw_data().to_vec());

        Ok(Self {
            lock: field(witness.lock()),
            input_type: field(witness.input_type()),
            output_type: field(witness.output_type()),
        })
    }
}

impl From<&Script> for packed::Script {
    fn from(script: &Script) -> Self {
        packed::Script::new_builder()
            .code_hash(script.code_hash.pack())
            .hash_type(packed::Byte::new(script.hash_type.as_byte()))
            .args(Bytes::from(script.args.clone()).pack())
            .build()
    }
}

impl From<&OutPoint> for packed::OutPoint {
    fn from(out_point: &OutPoint) -> Self {
        packed::OutPoint::new_builder()
            .tx_hash(out_point.tx_hash.pack())
            .index(out_point.index.pack())
            .build()
    }
}

impl From<&CellDep> for packed::CellDep {
    fn from(cell_dep: &CellDep) -> Self {
        packed::CellDep::new_builder()
            .out_point(packed::OutPoint::from(&cell_dep.out_point))
            .dep_type(packed::Byte::new(cell_dep.dep_type.as_byte()))
            .build()
    }
}

/// Serde helpers for `0x`-prefixed hex byte strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        decode(&raw).map_err(serde::de::Error::custom)
    }

    /// Decode hex with or without the `0x` prefix.
    pub fn decode(raw: &str) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(raw.strip_prefix("0x").unwrap_or(raw))
    }
}

/// Serde helpers for 32-byte hashes written as hex.
pub mod hex_byte32 {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Byte32;

    pub fn serialize<S: Serializer>(bytes: &Byte32, serializer: S) -> Result<S::Ok, S::Error> {
        super::hex_bytes::serialize(bytes, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Byte32, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = super::hex_bytes::decode(&raw).map_err(serde::de::Error::custom)?;
        Byte32::try_from(bytes.as_slice())
            .map_err(|_| serde::de::Error::custom(format!("expected 32 bytes, got {}", bytes.len())))
    }
}
