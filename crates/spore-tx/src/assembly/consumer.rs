//! Spending existing cells, optionally re-emitting an updated copy.

use std::sync::Arc;

use crate::config::{ScriptKind, SporeConfig};
use crate::data::SporeData;
use crate::error::SporeError;
use crate::provider::{CellProvider, get_spore_by_out_point};
use crate::skeleton::TransactionSkeleton;
use crate::types::{Cell, CellDep, OutPoint, Script, WitnessArgs};

/// Caller hook applied to a cell before it is written as an output.
pub type CellHook = Arc<dyn Fn(Cell) -> Cell + Send + Sync>;

/// Witness and time lock attached to a spent cell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InputOptions {
    /// Explicit witness. Without one, the first input of a lock group gets a
    /// signature placeholder and later inputs of the group get an empty witness.
    pub witness: Option<Vec<u8>>,
    pub since: Option<u64>,
}

/// How a spent cell is written back as an output.
#[derive(Clone, Default)]
pub struct Reemit {
    /// New owner. `None` keeps the current lock.
    pub to_lock: Option<Script>,
    /// Resize the output to occupied capacity plus this margin. `None` keeps the capacity.
    pub capacity_margin: Option<u64>,
    pub update_output: Option<CellHook>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumedCell {
    pub input_index: usize,
    pub output_index: Option<usize>,
    pub cell: Cell,
}

/// Witness for a new input locked by `lock`.
pub(crate) fn input_witness(skeleton: &TransactionSkeleton, lock: &Script, explicit: Option<&[u8]>) -> Vec<u8> {
    if let Some(witness) = explicit {
        return witness.to_vec();
    }
    if skeleton.lock_group_first_input(lock).is_some() {
        return Vec::new();
    }
    WitnessArgs::placeholder().pack()
}

/// Capacity of `cell` resized to its occupied capacity plus `margin`.
pub(crate) fn capacity_with_margin(cell: &Cell, margin: u64) -> Result<u64, SporeError> {
    cell.occupied_capacity()?.checked_add(margin).ok_or_else(|| {
        SporeError::CapacityOverflow(format!("capacity margin {margin} overflows the cell capacity"))
    })
}

/// Apply the caller hook and make sure the result still covers its own storage.
pub(crate) fn finish_output(cell: Cell, hook: Option<&CellHook>) -> Result<Cell, SporeError> {
    let cell = match hook {
        Some(hook) => hook(cell),
        None => cell,
    };

    let occupied = cell.occupied_capacity()?;
    if cell.capacity < occupied {
        return Err(SporeError::InvalidRequest(format!(
            "output capacity {} is below its occupied capacity {occupied}",
            cell.capacity
        )));
    }
    Ok(cell)
}

/// Add a resolved cell as an input, and optionally its updated copy as an output.
///
/// The re-emitted output is built and checked first, so a failure leaves the
/// skeleton untouched.
pub fn inject_live_cell(
    skeleton: &mut TransactionSkeleton,
    cell: Cell,
    options: &InputOptions,
    reemit: Option<&Reemit>,
    cell_dep: Option<CellDep>,
) -> Result<ConsumedCell, SporeError> {
    let out_point = cell.out_point.ok_or_else(|| {
        SporeError::InvalidRequest("cannot spend a cell without an out point".to_string())
    })?;
    if skeleton.contains_input(&out_point) {
        return Err(SporeError::InvalidRequest(format!(
            "cell {out_point} is already spent by this transaction"
        )));
    }

    let output = reemit
        .map(|reemit| {
            let mut output = cell.clone();
            output.out_point = None;
            if let Some(lock) = &reemit.to_lock {
                output.lock = lock.clone();
            }
            if let Some(margin) = reemit.capacity_margin {
                output.capacity = capacity_with_margin(&output, margin)?;
            }
            finish_output(output, reemit.update_output.as_ref())
        })
        .transpose()?;

    let witness = input_witness(skeleton, &cell.lock, options.witness.as_deref());
    let input_index = skeleton.add_input(cell.clone(), witness, options.since);
    if let Some(cell_dep) = cell_dep {
        skeleton.add_cell_dep(cell_dep);
    }
    let output_index = output.map(|output| skeleton.add_output(output));

    tracing::debug!(%out_point, input_index, ?output_index, "spent live cell");
    Ok(ConsumedCell {
        input_index,
        output_index,
        cell,
    })
}

fn check_meltable(cell: &Cell) -> Result<(), SporeError> {
    if SporeData::unpack(&cell.data)?.is_immortal() {
        return Err(SporeError::PolicyViolation(format!(
            "spore {} is immortal and cannot be melted",
            cell.out_point.map_or_else(|| "without out point".to_string(), |out_point| out_point.to_string())
        )));
    }
    Ok(())
}

/// Resolve a spore and check it may be melted, without touching the skeleton.
pub fn resolve_meltable_spore<P: CellProvider + ?Sized>(
    provider: &P,
    out_point: &OutPoint,
    config: &SporeConfig,
) -> Result<Cell, SporeError> {
    let cell = get_spore_by_out_point(provider, out_point, config)?;
    check_meltable(&cell)?;
    Ok(cell)
}

/// Spend a resolved spore without re-emitting it. Immortal spores are
/// rejected before anything is added.
pub fn inject_melt_spore(
    skeleton: &mut TransactionSkeleton,
    cell: Cell,
    options: &InputOptions,
    config: &SporeConfig,
) -> Result<ConsumedCell, SporeError> {
    check_meltable(&cell)?;
    let cell_dep = script_cell_dep(&cell, ScriptKind::Spore, config)?;
    inject_live_cell(skeleton, cell, options, None, Some(cell_dep))
}

/// Spend a spore and re-emit it under `reemit`'s lock.
pub fn inject_transfer_spore<P: CellProvider + ?Sized>(
    skeleton: &mut TransactionSkeleton,
    provider: &P,
    out_point: &OutPoint,
    options: &InputOptions,
    reemit: &Reemit,
    config: &SporeConfig,
) -> Result<ConsumedCell, SporeError> {
    let cell = get_spore_by_out_point(provider, out_point, config)?;
    let cell_dep = script_cell_dep(&cell, ScriptKind::Spore, config)?;
    inject_live_cell(skeleton, cell, options, Some(reemit), Some(cell_dep))
}

/// Cell dependency of the registered script matching `cell`'s type.
pub(crate) fn script_cell_dep(cell: &Cell, kind: ScriptKind, config: &SporeConfig) -> Result<CellDep, SporeError> {
    let type_script = cell.type_script.as_ref().ok_or_else(|| {
        SporeError::InvalidRequest(format!("expected a {kind} cell with a type script"))
    })?;
    Ok(config.scripts.find(kind, type_script)?.cell_dep)
}
