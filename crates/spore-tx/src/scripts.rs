//! One-way hashing and type identifier derivation.
//!
//! Every hash is blake2b-256 with the ledger's `ckb-default-hash` personalization.

use ckb_hash::{blake2b_256, new_blake2b};
use ckb_types::packed;
use ckb_types::prelude::*;

use crate::error::SporeError;
use crate::skeleton::TransactionSkeleton;
use crate::types::{Byte32, OutPoint, Script};

#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> Byte32 {
    blake2b_256(bytes)
}

/// Hash of the packed script layout.
#[must_use]
pub fn hash_script(script: &Script) -> Byte32 {
    blake2b_256(packed::Script::from(script).as_slice())
}

/// Identifier of the typed cell created at `output_index`, anchored to the
/// transaction's first input consumed with no time lock.
///
/// The anchor is spent by the transaction, so no other transaction can derive
/// the same identifier.
#[must_use]
pub fn derive_type_id(anchor: &OutPoint, output_index: u64) -> Byte32 {
    derive_type_id_with_since(anchor, 0, output_index)
}

/// Identifier derived from the packed first input (`since` then out point)
/// followed by the little-endian output index.
#[must_use]
pub fn derive_type_id_with_since(anchor: &OutPoint, since: u64, output_index: u64) -> Byte32 {
    let input = packed::CellInput::new(packed::OutPoint::from(anchor), since);
    let mut hasher = new_blake2b();
    hasher.update(input.as_slice());
    hasher.update(&output_index.to_le_bytes());

    let mut id = [0u8; 32];
    hasher.finalize(&mut id);
    id
}

/// Write derived identifiers into the type args of the given outputs.
///
/// `anchor` must be captured once the input set is final, and it must be
/// input 0 of `skeleton` so its time lock is part of the preimage. Returns the
/// identifiers in the order of `output_indices`.
pub fn inject_type_ids(
    skeleton: &mut TransactionSkeleton,
    anchor: &OutPoint,
    output_indices: &[usize],
) -> Result<Vec<Byte32>, SporeError> {
    let since = skeleton.input_since(0);
    let mut ids = Vec::with_capacity(output_indices.len());

    for &output_index in output_indices {
        let id = derive_type_id_with_since(anchor, since, output_index as u64);
        let output = skeleton.output_mut(output_index).ok_or_else(|| {
            SporeError::InvalidRequest(format!(
                "cannot inject identifier: output {output_index} does not exist"
            ))
        })?;
        let type_script = output.type_script.as_mut().ok_or_else(|| {
            SporeError::InvalidRequest(format!(
                "cannot inject identifier: output {output_index} has no type script"
            ))
        })?;
        type_script.args = id.to_vec();

        tracing::debug!(
            output_index,
            id = %hex::encode(id),
            anchor = %anchor,
            "derived type identifier"
        );
        ids.push(id);
    }

    Ok(ids)
}
