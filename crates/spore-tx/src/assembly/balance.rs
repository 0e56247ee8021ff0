//! Capacity and fee balancing.
//!
//! The balancer closes the capacity equation `inputs == outputs + fee` for a
//! skeleton whose protocol outputs are already in place, and runs the caller's
//! finalize step at the one point where the input set is fixed.
//!
//! # Algorithm
//!
//! 1. Snapshot input and output capacity.
//! 2. Choose a path. Redeem when inputs strictly exceed outputs plus the change
//!    cell's occupied capacity plus the fee estimated with that change cell in place.
//!    Otherwise collect.
//! 3. Collect: walk the funding sources in the order given and add their cells
//!    first-fit until the requirement is covered. Each source is queried once.
//! 4. Capture the first input's out point once and hand it to the finalize step,
//!    which derives identifiers and writes action proofs.
//! 5. If finalizing grew the transaction past what the inputs cover, append more
//!    funding cells. Appending never moves input 0.
//! 6. Append the change output. The fee is measured with it in place:
//!    `fee = ceil(fee_rate * size / 1000)`.
//! 7. Assert exact conservation and the size ceiling.
//!
//! # Complexity
//!
//! Let `N` be the number of funding cells added and `S` the serialized size of the
//! final transaction. Each added cell re-measures the skeleton, so the worst case
//! is `O(N * S)`. Provider round trips are bounded by the number of sources.
//!
//! # Failure modes
//!
//! - Sources exhausted before the requirement is covered fail with `InsufficientFunding`.
//! - A finalize step that replaces input 0 fails with `InvalidRequest`.
//! - Capacity arithmetic overflow fails with `CapacityOverflow`.
//! - A final size above the ceiling fails with `OversizedTransaction`.

use std::collections::VecDeque;

use ckb_types::prelude::*;

use crate::error::SporeError;
use crate::provider::CellProvider;
use crate::skeleton::TransactionSkeleton;
use crate::types::{Cell, CellDep, OutPoint, Script, WitnessArgs};

/// Caller-owned cells that may be spent to fund the transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FundingSource {
    pub lock: Script,
    /// Dependencies needed to unlock cells under `lock`.
    pub cell_deps: Vec<CellDep>,
    /// Witness for the first input of this lock group.
    pub witness_placeholder: Vec<u8>,
}

impl FundingSource {
    #[must_use]
    pub fn new(lock: Script) -> Self {
        Self {
            lock,
            cell_deps: Vec::new(),
            witness_placeholder: WitnessArgs::placeholder().pack(),
        }
    }

    #[must_use]
    pub fn with_cell_deps(mut self, cell_deps: Vec<CellDep>) -> Self {
        self.cell_deps = cell_deps;
        self
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BalanceParams<'a> {
    pub sources: &'a [FundingSource],
    pub change_lock: &'a Script,
    /// Shannons per 1000 bytes.
    pub fee_rate: u64,
    pub max_transaction_size: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalancePath {
    /// Inputs already covered outputs and fee; the surplus went to change.
    Redeemed,
    /// Funding cells were added to cover outputs and fee.
    Collected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Balanced {
    pub skeleton: TransactionSkeleton,
    pub fee: u64,
    pub path: BalancePath,
    pub change_output_index: usize,
    /// Funding cells added, including any added after finalizing.
    pub collected_inputs: usize,
}

/// `ceil(size * fee_rate / 1000)`.
pub fn calculate_fee(size: u64, fee_rate: u64) -> Result<u64, SporeError> {
    let fee = (u128::from(size) * u128::from(fee_rate)).div_ceil(1000);
    u64::try_from(fee).map_err(|_| {
        SporeError::CapacityOverflow(format!("fee for {size} bytes at rate {fee_rate} overflows"))
    })
}

/// Fail if the transaction is larger than `limit` bytes.
pub fn assert_transaction_size(skeleton: &TransactionSkeleton, limit: Option<u64>) -> Result<(), SporeError> {
    let Some(limit) = limit else {
        return Ok(());
    };
    let size = skeleton.serialized_size();
    if size > limit {
        return Err(SporeError::OversizedTransaction { size, limit });
    }
    Ok(())
}

/// Fail unless `inputs == outputs + fee` holds exactly.
pub fn assert_capacity_conservation(skeleton: &TransactionSkeleton, fee: u64) -> Result<(), SporeError> {
    let snapshot = skeleton.capacity_snapshot()?;
    let demand = snapshot.outputs_capacity.checked_add(fee).ok_or_else(|| {
        SporeError::CapacityOverflow("output capacity plus fee overflows".to_string())
    })?;
    if snapshot.inputs_capacity == demand {
        return Ok(());
    }

    Err(SporeError::InvalidRequest(format!(
        "capacity conservation violated after balancing: inputs={}, outputs={}, fee={fee}",
        snapshot.inputs_capacity, snapshot.outputs_capacity
    )))
}

/// Bytes a plain output adds to the serialized transaction.
fn output_entry_size(cell: &Cell) -> u64 {
    // dynvec offsets for the output and its data, then the data's length prefix
    (cell.to_output().as_slice().len() + 4 + 4 + 4 + cell.data.len()) as u64
}

/// Capacity the inputs must reach for the change output to be valid, and the fee it includes.
fn requirement(skeleton: &TransactionSkeleton, change: &Cell, fee_rate: u64) -> Result<(u64, u64), SporeError> {
    let size = skeleton.serialized_size() + output_entry_size(change);
    let fee = calculate_fee(size, fee_rate)?;
    let change_minimum = change.occupied_capacity()?;
    let required = skeleton
        .capacity_snapshot()?
        .outputs_capacity
        .checked_add(fee)
        .and_then(|total| total.checked_add(change_minimum))
        .ok_or_else(|| {
            SporeError::CapacityOverflow("required capacity overflows".to_string())
        })?;
    Ok((required, fee))
}

/// Lazily fetched funding candidates, walked in source order.
struct FundingCursor<'a, P: ?Sized> {
    sources: &'a [FundingSource],
    provider: &'a P,
    candidates: Vec<Option<VecDeque<Cell>>>,
    source_index: usize,
}

impl<'a, P: CellProvider + ?Sized> FundingCursor<'a, P> {
    fn new(sources: &'a [FundingSource], provider: &'a P) -> Self {
        Self {
            sources,
            provider,
            candidates: vec![None; sources.len()],
            source_index: 0,
        }
    }

    /// Next unspent plain cell, fetching each source's candidates at most once.
    fn next(
        &mut self,
        skeleton: &TransactionSkeleton,
        deficit: u64,
    ) -> Result<Option<(Cell, &'a FundingSource)>, SporeError> {
        let sources = self.sources;
        while let Some(source) = sources.get(self.source_index) {
            if self.candidates[self.source_index].is_none() {
                let cells = self.provider.collect_cells(&source.lock, deficit)?;
                tracing::debug!(
                    source = self.source_index,
                    candidates = cells.len(),
                    deficit,
                    "fetched funding candidates"
                );
                self.candidates[self.source_index] = Some(VecDeque::from(cells));
            }

            let queue = self.candidates[self.source_index].get_or_insert_with(VecDeque::new);
            while let Some(cell) = queue.pop_front() {
                let usable = cell.is_plain()
                    && cell
                        .out_point
                        .is_some_and(|out_point| !skeleton.contains_input(&out_point));
                if usable {
                    return Ok(Some((cell, source)));
                }
            }

            self.source_index += 1;
        }

        Ok(None)
    }
}

/// Append funding cells until the inputs cover outputs, fee and change. Returns the count.
fn collect_until_covered<P: CellProvider + ?Sized>(
    skeleton: &mut TransactionSkeleton,
    cursor: &mut FundingCursor<'_, P>,
    change: &Cell,
    fee_rate: u64,
) -> Result<usize, SporeError> {
    let mut added = 0;
    loop {
        let (required, _) = requirement(skeleton, change, fee_rate)?;
        let available = skeleton.capacity_snapshot()?.inputs_capacity;
        if available >= required {
            return Ok(added);
        }

        let Some((cell, source)) = cursor.next(skeleton, required - available)? else {
            return Err(SporeError::InsufficientFunding {
                required,
                available,
            });
        };

        let witness = if skeleton.lock_group_first_input(&cell.lock).is_some() {
            Vec::new()
        } else {
            source.witness_placeholder.clone()
        };
        skeleton.add_input(cell, witness, None);
        for cell_dep in &source.cell_deps {
            skeleton.add_cell_dep(*cell_dep);
        }
        added += 1;
    }
}

/// Balance `skeleton`, running `finalize` once the input set is fixed.
///
/// `finalize` receives the out point of input 0. It may rewrite outputs in place
/// and add witnesses, but must not change the input set or output capacities.
#[tracing::instrument(level = "debug", skip_all, err)]
pub fn balance_capacity<P, F>(
    mut skeleton: TransactionSkeleton,
    params: &BalanceParams<'_>,
    provider: &P,
    finalize: F,
) -> Result<Balanced, SporeError>
where
    P: CellProvider + ?Sized,
    F: FnOnce(TransactionSkeleton, &OutPoint) -> Result<TransactionSkeleton, SporeError>,
{
    let change = Cell::new(0, params.change_lock.clone(), None, Vec::new());
    let snapshot = skeleton.capacity_snapshot()?;
    let (required, estimated_fee) = requirement(&skeleton, &change, params.fee_rate)?;

    let mut path = if snapshot.inputs_capacity > required {
        BalancePath::Redeemed
    } else {
        BalancePath::Collected
    };
    tracing::debug!(
        inputs = snapshot.inputs_capacity,
        outputs = snapshot.outputs_capacity,
        estimated_fee,
        ?path,
        "chose balancing path"
    );

    let mut cursor = FundingCursor::new(params.sources, provider);
    let mut collected_inputs = 0;
    if path == BalancePath::Collected {
        collected_inputs += collect_until_covered(&mut skeleton, &mut cursor, &change, params.fee_rate)?;
    }

    let anchor = skeleton.first_input_out_point()?;
    let mut skeleton = finalize(skeleton, &anchor)?;
    if skeleton.first_input_out_point()? != anchor {
        return Err(SporeError::InvalidRequest(
            "finalize step replaced the anchor input".to_string(),
        ));
    }

    let topped_up = collect_until_covered(&mut skeleton, &mut cursor, &change, params.fee_rate)?;
    if topped_up > 0 {
        tracing::debug!(topped_up, "finalize step grew the fee, added funding");
        path = BalancePath::Collected;
    }
    collected_inputs += topped_up;

    let change_output_index = skeleton.add_output(change);
    let fee = calculate_fee(skeleton.serialized_size(), params.fee_rate)?;
    let snapshot = skeleton.capacity_snapshot()?;
    let change_capacity = snapshot
        .inputs_capacity
        .checked_sub(snapshot.outputs_capacity)
        .and_then(|surplus| surplus.checked_sub(fee))
        .ok_or(SporeError::InsufficientFunding {
            required: snapshot.outputs_capacity.saturating_add(fee),
            available: snapshot.inputs_capacity,
        })?;

    let change_cell = skeleton.output_mut(change_output_index).ok_or_else(|| {
        SporeError::InvalidRequest(format!("change output {change_output_index} missing"))
    })?;
    change_cell.capacity = change_capacity;

    assert_capacity_conservation(&skeleton, fee)?;
    assert_transaction_size(&skeleton, params.max_transaction_size)?;

    tracing::info!(
        ?path,
        fee,
        change_capacity,
        collected_inputs,
        size = skeleton.serialized_size(),
        "balanced transaction"
    );

    Ok(Balanced {
        skeleton,
        fee,
        path,
        change_output_index,
        collected_inputs,
    })
}

/// Pay the fee out of the first listed output whose margin covers it.
///
/// Any surplus of inputs over outputs is counted towards the fee first. A surplus
/// larger than the fee has no output to go to and is rejected. Returns the fee and
/// the index of the output that paid.
pub fn pay_fee_by_output(
    skeleton: &mut TransactionSkeleton,
    candidate_outputs: &[usize],
    fee_rate: u64,
) -> Result<(u64, Option<usize>), SporeError> {
    let fee = calculate_fee(skeleton.serialized_size(), fee_rate)?;
    let surplus = skeleton.capacity_snapshot()?.surplus().ok_or_else(|| {
        SporeError::InvalidRequest("outputs exceed inputs, nothing to pay the fee from".to_string())
    })?;
    if surplus > fee {
        return Err(SporeError::InvalidRequest(format!(
            "inputs exceed outputs by {surplus} but the fee is {fee}; balance with a change output instead"
        )));
    }
    if surplus == fee {
        return Ok((fee, None));
    }

    let needed = fee - surplus;
    let mut best_margin = 0;
    for &index in candidate_outputs {
        let output = skeleton.output_mut(index).ok_or_else(|| {
            SporeError::InvalidRequest(format!("fee output {index} does not exist"))
        })?;
        let margin = output.free_capacity()?;
        if margin >= needed {
            output.capacity -= needed;
            tracing::debug!(output_index = index, fee, "paid fee from output margin");
            return Ok((fee, Some(index)));
        }
        best_margin = best_margin.max(margin);
    }

    Err(SporeError::InsufficientFunding {
        required: needed,
        available: best_margin,
    })
}
