//! Molecule records for Spore cell data and cobuild witnesses.
//!
//! Structs are tables, `Vec<u8>` is `Bytes`, `Option<Vec<u8>>` is `BytesOpt`
//! and enums are unions. Unions whose item ids are not contiguous are framed
//! with [`pack_union`] and [`split_union`] around a table item.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_molecule::dynvec_serde;

use crate::error::SporeError;
use crate::types::{Byte32, HashType, Script};

pub fn pack<T: Serialize>(value: &T) -> Result<Vec<u8>, SporeError> {
    serde_molecule::to_vec(value, false).map_err(|err| SporeError::Layout(err.to_string()))
}

/// Strict decode. `error` picks the variant reported to the caller.
pub fn unpack<T: DeserializeOwned>(
    bytes: &[u8],
    what: &str,
    error: fn(String) -> SporeError,
) -> Result<T, SporeError> {
    serde_molecule::from_slice(bytes, false).map_err(|err| error(format!("{what}: {err}")))
}

pub fn pack_union<T: Serialize>(item_id: u32, item: &T) -> Result<Vec<u8>, SporeError> {
    let mut packed = item_id.to_le_bytes().to_vec();
    packed.extend(pack(item)?);
    Ok(packed)
}

/// Item id and item bytes of a union, or `None` when the id is cut short.
#[must_use]
pub fn split_union(bytes: &[u8]) -> Option<(u32, &[u8])> {
    let (item_id, item) = bytes.split_first_chunk::<4>()?;
    Some((u32::from_le_bytes(*item_id), item))
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ScriptLayout {
    pub code_hash: Byte32,
    pub hash_type: u8,
    pub args: Vec<u8>,
}

impl From<&Script> for ScriptLayout {
    fn from(script: &Script) -> Self {
        Self {
            code_hash: script.code_hash,
            hash_type: script.hash_type.as_byte(),
            args: script.args.clone(),
        }
    }
}

impl ScriptLayout {
    /// `None` when the hash type byte names no known variant.
    #[must_use]
    pub fn into_script(self) -> Option<Script> {
        let hash_type = HashType::from_byte(self.hash_type)?;
        Some(Script::new(self.code_hash, hash_type, self.args))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Address {
    Script(ScriptLayout),
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SporeDataLayout {
    pub content_type: Vec<u8>,
    pub content: Vec<u8>,
    pub cluster_id: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClusterDataV1 {
    pub name: Vec<u8>,
    pub description: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ClusterDataV2 {
    pub name: Vec<u8>,
    pub description: Vec<u8>,
    pub mutant_id: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MintSpore {
    pub spore_id: Byte32,
    pub to: Address,
    pub data_hash: Byte32,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransferSpore {
    pub spore_id: Byte32,
    pub from: Address,
    pub to: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BurnSpore {
    pub spore_id: Byte32,
    pub from: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MintCluster {
    pub cluster_id: Byte32,
    pub to: Address,
    pub data_hash: Byte32,
}

/// Shared by cluster and cluster agent transfers.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransferCluster {
    pub cluster_id: Byte32,
    pub from: Address,
    pub to: Address,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ActionLayout {
    pub script_info_hash: Byte32,
    pub script_hash: Byte32,
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MessageLayout {
    #[serde(with = "dynvec_serde")]
    pub actions: Vec<ActionLayout>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SighashAll {
    pub message: MessageLayout,
    pub seal: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SighashAllOnly {
    pub seal: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use ckb_types::packed;
    use ckb_types::prelude::*;

    use super::*;

    fn script() -> Script {
        Script::new([0x3C; 32], HashType::Data1, vec![1, 2, 3])
    }

    #[test]
    fn script_layout_matches_ledger_script() {
        let bytes = pack(&ScriptLayout::from(&script())).expect("packs");
        assert_eq!(bytes, packed::Script::from(&script()).as_slice());
    }

    #[test]
    fn address_is_a_union_over_the_script() {
        let bytes = pack(&Address::Script(ScriptLayout::from(&script()))).expect("packs");
        assert_eq!(split_union(&bytes), Some((0, script().pack().as_slice())));
    }

    #[test]
    fn unknown_hash_type_does_not_convert() {
        let mut layout = ScriptLayout::from(&script());
        assert_eq!(layout.clone().into_script(), Some(script()));

        layout.hash_type = 3;
        assert_eq!(layout.into_script(), None);
    }

    #[test]
    fn strict_decode_rejects_extra_fields() {
        let v2 = ClusterDataV2 {
            name: b"n".to_vec(),
            description: b"d".to_vec(),
            mutant_id: None,
        };
        let bytes = pack(&v2).expect("packs");
        match unpack::<ClusterDataV1>(&bytes, "cluster", SporeError::InvalidCellData) {
            Err(SporeError::InvalidCellData(message)) => assert!(message.starts_with("cluster")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn short_union_has_no_item_id() {
        assert_eq!(split_union(&[1, 0, 0]), None);
        assert_eq!(split_union(&[9, 0, 0, 0]), Some((9, &[][..])));
    }
}
