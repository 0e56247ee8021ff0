//! Ledger collaborators: live cell lookup, funding candidates and fee rate.
//!
//! Every lookup is a blocking round trip. Assembly performs each lookup at most
//! once per need and never retries; retry policy belongs to the implementor.

use crate::config::{FeeRatePolicy, ScriptKind, SporeConfig};
use crate::error::SporeError;
use crate::types::{Cell, OutPoint, Script};

/// Protocol minimum fee rate in shannons per 1000 bytes.
pub const DEFAULT_FEE_RATE: u64 = 1000;

/// Lookup result for one out point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CellStatus {
    Live(Cell),
    /// The cell existed but has been consumed.
    Dead,
    Unknown,
}

pub trait CellProvider {
    fn get_live_cell(&self, out_point: &OutPoint) -> Result<CellStatus, SporeError>;

    /// Plain cells (no type script, no data) owned by `lock`, oldest first.
    ///
    /// Implementations may stop once the returned capacity reaches
    /// `minimum_capacity`, but may also return more.
    fn collect_cells(&self, lock: &Script, minimum_capacity: u64) -> Result<Vec<Cell>, SporeError>;

    /// Live cells typed by `type_script`'s code hash and hash type whose args
    /// start with its args. Returned cells carry their out points.
    fn find_cells_by_type(&self, type_script: &Script) -> Result<Vec<Cell>, SporeError>;
}

pub trait FeeRateProvider {
    /// Minimum fee rate accepted by the pool, in shannons per 1000 bytes.
    fn min_fee_rate(&self) -> Result<u64, SporeError>;
}

/// Resolve an out point to a live cell, tagging it with its out point.
pub fn resolve_live_cell<P: CellProvider + ?Sized>(
    provider: &P,
    out_point: &OutPoint,
) -> Result<Cell, SporeError> {
    match provider.get_live_cell(out_point)? {
        CellStatus::Live(cell) => Ok(cell.with_out_point(*out_point)),
        CellStatus::Dead => Err(SporeError::AlreadySpent(*out_point)),
        CellStatus::Unknown => Err(SporeError::CellNotFound(*out_point)),
    }
}

fn resolve_typed_cell<P: CellProvider + ?Sized>(
    provider: &P,
    out_point: &OutPoint,
    kind: ScriptKind,
    config: &SporeConfig,
) -> Result<Cell, SporeError> {
    let cell = resolve_live_cell(provider, out_point)?;
    let type_script = cell.type_script.as_ref().ok_or_else(|| {
        SporeError::InvalidRequest(format!("cell {out_point} has no type script, expected {kind}"))
    })?;
    config.scripts.find(kind, type_script)?;

    Ok(cell)
}

pub fn get_spore_by_out_point<P: CellProvider + ?Sized>(
    provider: &P,
    out_point: &OutPoint,
    config: &SporeConfig,
) -> Result<Cell, SporeError> {
    resolve_typed_cell(provider, out_point, ScriptKind::Spore, config)
}

pub fn get_cluster_by_out_point<P: CellProvider + ?Sized>(
    provider: &P,
    out_point: &OutPoint,
    config: &SporeConfig,
) -> Result<Cell, SporeError> {
    resolve_typed_cell(provider, out_point, ScriptKind::Cluster, config)
}

pub fn get_cluster_agent_by_out_point<P: CellProvider + ?Sized>(
    provider: &P,
    out_point: &OutPoint,
    config: &SporeConfig,
) -> Result<Cell, SporeError> {
    resolve_typed_cell(provider, out_point, ScriptKind::ClusterAgent, config)
}

/// Find the live mutant cell holding `mutant_id`, trying every registered version.
pub fn get_mutant_by_id<P: CellProvider + ?Sized>(
    provider: &P,
    mutant_id: &[u8],
    config: &SporeConfig,
) -> Result<Cell, SporeError> {
    for info in config.scripts.versions(ScriptKind::Mutant) {
        let found = provider
            .find_cells_by_type(&info.script(mutant_id.to_vec()))?
            .into_iter()
            .find(|cell| cell.out_point.is_some());
        if let Some(cell) = found {
            return Ok(cell);
        }
    }
    Err(SporeError::InvalidRequest(format!(
        "no live mutant cell holds id 0x{}",
        hex::encode(mutant_id)
    )))
}

/// Fee rate in effect: explicit rate, then configured policy.
///
/// A collaborator answering zero falls back to [`DEFAULT_FEE_RATE`].
pub fn resolve_fee_rate<F: FeeRateProvider + ?Sized>(
    explicit: Option<u64>,
    config: &SporeConfig,
    fees: &F,
) -> Result<u64, SporeError> {
    if let Some(rate) = explicit {
        return Ok(rate);
    }

    match config.fee_rate {
        FeeRatePolicy::Fixed(rate) => Ok(rate),
        FeeRatePolicy::FetchMinimum => {
            let fetched = fees.min_fee_rate()?;
            if fetched == 0 {
                tracing::warn!(
                    fallback = DEFAULT_FEE_RATE,
                    "fee collaborator returned zero, using protocol minimum"
                );
                return Ok(DEFAULT_FEE_RATE);
            }
            Ok(fetched)
        }
    }
}
