//! Ordered transaction skeleton.
//!
//! The skeleton keeps inputs, outputs, cell dependencies, header dependencies,
//! witnesses and per-input relative time locks in the order they were added.
//! Callers interleave their own cells around protocol cells by choosing when
//! to add them: everything added before a protocol stage is a prefix, everything
//! added after is a postfix.
//!
//! Witnesses are index-aligned with inputs. Extra witnesses past the last input
//! are allowed, and adding an input later inserts its witness at the input
//! index so the alignment is kept.

use std::collections::BTreeMap;

use ckb_types::bytes::Bytes;
use ckb_types::packed;
use ckb_types::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::SporeError;
use crate::types::{Byte32, Cell, CellDep, OutPoint, Script};

/// Transaction format version written into the raw layout.
const TX_VERSION: u32 = 0;

/// Bytes a transaction adds to its enclosing block beyond its own layout.
const BLOCK_ENTRY_OVERHEAD: u64 = 4;

/// Capacity sums taken from the skeleton at one point in time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapacitySnapshot {
    pub inputs_capacity: u64,
    pub outputs_capacity: u64,
}

impl CapacitySnapshot {
    /// `inputs - outputs`, or `None` when outputs are not covered.
    #[must_use]
    pub fn surplus(&self) -> Option<u64> {
        self.inputs_capacity.checked_sub(self.outputs_capacity)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSkeleton {
    inputs: Vec<Cell>,
    outputs: Vec<Cell>,
    cell_deps: Vec<CellDep>,
    header_deps: Vec<Byte32>,
    witnesses: Vec<Vec<u8>>,
    input_sinces: BTreeMap<usize, u64>,
}

impl TransactionSkeleton {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn inputs(&self) -> &[Cell] {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[Cell] {
        &self.outputs
    }

    #[must_use]
    pub fn cell_deps(&self) -> &[CellDep] {
        &self.cell_deps
    }

    #[must_use]
    pub fn header_deps(&self) -> &[Byte32] {
        &self.header_deps
    }

    #[must_use]
    pub fn witnesses(&self) -> &[Vec<u8>] {
        &self.witnesses
    }

    #[must_use]
    pub fn witness(&self, index: usize) -> Option<&[u8]> {
        self.witnesses.get(index).map(Vec::as_slice)
    }

    /// Relative time lock of one input. Zero when none was set.
    #[must_use]
    pub fn input_since(&self, index: usize) -> u64 {
        self.input_sinces.get(&index).copied().unwrap_or(0)
    }

    pub fn output_mut(&mut self, index: usize) -> Option<&mut Cell> {
        self.outputs.get_mut(index)
    }

    /// Append an input with its witness and optional relative time lock.
    ///
    /// Returns the input index.
    pub fn add_input(&mut self, cell: Cell, witness: Vec<u8>, since: Option<u64>) -> usize {
        let index = self.inputs.len();
        self.inputs.push(cell);

        if self.witnesses.len() < index {
            self.witnesses.resize(index, Vec::new());
        }
        self.witnesses.insert(index, witness);

        if let Some(since) = since {
            self.input_sinces.insert(index, since);
        }

        index
    }

    /// Append an output. Returns the output index.
    pub fn add_output(&mut self, cell: Cell) -> usize {
        self.outputs.push(cell);
        self.outputs.len() - 1
    }

    /// Add a cell dependency unless an equal one is already present.
    pub fn add_cell_dep(&mut self, cell_dep: CellDep) {
        if !self.cell_deps.contains(&cell_dep) {
            self.cell_deps.push(cell_dep);
        }
    }

    pub fn add_header_dep(&mut self, block_hash: Byte32) {
        if !self.header_deps.contains(&block_hash) {
            self.header_deps.push(block_hash);
        }
    }

    /// Replace the witness at `index`, growing the list with empty witnesses if needed.
    pub fn set_witness(&mut self, index: usize, witness: Vec<u8>) {
        if self.witnesses.len() <= index {
            self.witnesses.resize(index + 1, Vec::new());
        }
        self.witnesses[index] = witness;
    }

    /// Append a witness past every existing one. Returns its index.
    pub fn push_witness(&mut self, witness: Vec<u8>) -> usize {
        self.witnesses.push(witness);
        self.witnesses.len() - 1
    }

    #[must_use]
    pub fn contains_input(&self, out_point: &OutPoint) -> bool {
        self.inputs
            .iter()
            .any(|cell| cell.out_point.as_ref() == Some(out_point))
    }

    /// Index of the first input locked by `lock`, the slot its group signs in.
    #[must_use]
    pub fn lock_group_first_input(&self, lock: &Script) -> Option<usize> {
        self.inputs.iter().position(|cell| &cell.lock == lock)
    }

    /// Out point of input 0, used as the identifier anchor.
    pub fn first_input_out_point(&self) -> Result<OutPoint, SporeError> {
        let first = self.inputs.first().ok_or_else(|| {
            SporeError::InvalidRequest(
                "cannot derive identifier: transaction has no inputs".to_string(),
            )
        })?;

        first.out_point.ok_or_else(|| {
            SporeError::InvalidRequest(
                "cannot derive identifier: first input has no out point".to_string(),
            )
        })
    }

    pub fn capacity_snapshot(&self) -> Result<CapacitySnapshot, SporeError> {
        Ok(CapacitySnapshot {
            inputs_capacity: sum_capacity(&self.inputs, "inputs")?,
            outputs_capacity: sum_capacity(&self.outputs, "outputs")?,
        })
    }

    /// The transaction as the ledger serializes it.
    ///
    /// Inputs without an out point pack a zeroed one, so the size is right
    /// even before every input is resolved.
    #[must_use]
    pub fn to_transaction(&self) -> packed::Transaction {
        let bytes = |raw: &[u8]| Bytes::from(raw.to_vec()).pack();

        let raw = packed::RawTransaction::new_builder()
            .version(TX_VERSION.pack())
            .cell_deps(
                packed::CellDepVec::new_builder()
                    .set(self.cell_deps.iter().map(packed::CellDep::from).collect())
                    .build(),
            )
            .header_deps(
                packed::Byte32Vec::new_builder()
                    .set(self.header_deps.iter().map(|hash| hash.pack()).collect())
                    .build(),
            )
            .inputs(
                packed::CellInputVec::new_builder()
                    .set(
                        self.inputs
                            .iter()
                            .enumerate()
                            .map(|(index, cell)| {
                                let out_point = cell.out_point.unwrap_or_default();
                                packed::CellInput::new(
                                    packed::OutPoint::from(&out_point),
                                    self.input_since(index),
                                )
                            })
                            .collect(),
                    )
                    .build(),
            )
            .outputs(
                packed::CellOutputVec::new_builder()
                    .set(self.outputs.iter().map(Cell::to_output).collect())
                    .build(),
            )
            .outputs_data(
                packed::BytesVec::new_builder()
                    .set(self.outputs.iter().map(|cell| bytes(&cell.data)).collect())
                    .build(),
            )
            .build();

        packed::Transaction::new_builder()
            .raw(raw)
            .witnesses(
                packed::BytesVec::new_builder()
                    .set(self.witnesses.iter().map(|witness| bytes(witness)).collect())
                    .build(),
            )
            .build()
    }

    #[must_use]
    pub fn pack(&self) -> Vec<u8> {
        self.to_transaction().as_slice().to_vec()
    }

    /// Size the transaction takes inside a block, in bytes.
    #[must_use]
    pub fn serialized_size(&self) -> u64 {
        self.to_transaction().as_slice().len() as u64 + BLOCK_ENTRY_OVERHEAD
    }
}

/// Sum cell capacities with overflow protection.
fn sum_capacity(cells: &[Cell], side: &str) -> Result<u64, SporeError> {
    cells.iter().try_fold(0u64, |total, cell| {
        total.checked_add(cell.capacity).ok_or_else(|| {
            SporeError::CapacityOverflow(format!("capacity overflow while summing {side}"))
        })
    })
}
