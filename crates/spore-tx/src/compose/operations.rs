//! High-level compositions.
//!
//! Every composition runs the same [`Composer`] pipeline; single-cell variants
//! are batches of one.

use std::slice;

use crate::assembly::balance::FundingSource;
use crate::assembly::injector::{ClusterOutputRequest, SporeOutputRequest};
use crate::compose::pipeline::{Composed, Composer, ExtraCells, FeeSource, MeltTarget, TransferTarget};
use crate::config::SporeConfig;
use crate::error::SporeError;
use crate::provider::{CellProvider, FeeRateProvider, resolve_fee_rate};

/// Settings shared by every composition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposeOptions {
    pub prefix: ExtraCells,
    pub postfix: ExtraCells,
    /// `None` pays from output margins for pure transfers without prefix or
    /// postfix inputs, and balances with change otherwise.
    pub fee_source: Option<FeeSource>,
    /// Overrides the configured fee rate policy, in shannons per 1000 bytes.
    pub fee_rate: Option<u64>,
}

impl ComposeOptions {
    /// Balance with change, collecting from `sources` in order.
    #[must_use]
    pub fn funded_by(sources: Vec<FundingSource>) -> Self {
        Self {
            fee_source: Some(FeeSource::Funding {
                sources,
                change_lock: None,
            }),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct Operation<'r> {
    melts: &'r [MeltTarget],
    transfers: &'r [TransferTarget],
    cluster: Option<&'r ClusterOutputRequest>,
    spores: &'r [SporeOutputRequest],
}

impl Operation<'_> {
    fn transfers_only(&self) -> bool {
        !self.transfers.is_empty() && self.melts.is_empty() && self.spores.is_empty() && self.cluster.is_none()
    }

    /// Extra inputs bring capacity that only a change output can absorb.
    fn default_fee_source(&self, options: &ComposeOptions) -> FeeSource {
        if self.transfers_only() && !has_extra_inputs(options) {
            FeeSource::OutputMargin
        } else {
            FeeSource::Funding {
                sources: Vec::new(),
                change_lock: None,
            }
        }
    }
}

fn has_extra_inputs(options: &ComposeOptions) -> bool {
    !options.prefix.inputs.is_empty() || !options.postfix.inputs.is_empty()
}

fn check_fee_source(
    operation: &Operation<'_>,
    fee_source: &FeeSource,
    options: &ComposeOptions,
) -> Result<(), SporeError> {
    match fee_source {
        FeeSource::OutputMargin => {
            let resized = operation.transfers.iter().find(|target| target.capacity_margin.is_some());
            if let Some(target) = resized {
                return Err(SporeError::InvalidRequest(format!(
                    "spore {} cannot be resized while its margin pays the fee",
                    target.out_point
                )));
            }
        }
        FeeSource::Funding { sources, .. } => {
            if operation.transfers_only() && sources.is_empty() && !has_extra_inputs(options) {
                return Err(SporeError::InvalidRequest(
                    "a transfer that does not pay from its margin needs a funding source".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn compose<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    operation: &Operation<'_>,
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    let fee_rate = resolve_fee_rate(options.fee_rate, config, ledger)?;
    let fee_source = options
        .fee_source
        .clone()
        .unwrap_or_else(|| operation.default_fee_source(options));
    check_fee_source(operation, &fee_source, options)?;

    let mut composer = Composer::new(ledger, config)
        .prefix(&options.prefix)?
        .melt(operation.melts)?
        .transfer(operation.transfers)?;
    if let Some(cluster) = operation.cluster {
        composer = composer.create_cluster(cluster)?;
    }
    composer
        .create_spores(operation.spores)?
        .postfix(&options.postfix)?
        .settle(&fee_source, fee_rate)
}

pub fn create_spore<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    request: &SporeOutputRequest,
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    create_multiple_spores(ledger, slice::from_ref(request), options, config)
}

#[tracing::instrument(level = "info", skip_all, fields(spores = requests.len()), err)]
pub fn create_multiple_spores<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    requests: &[SporeOutputRequest],
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    if requests.is_empty() {
        return Err(SporeError::InvalidRequest("no spores to create".to_string()));
    }
    let operation = Operation {
        spores: requests,
        ..Operation::default()
    };
    compose(ledger, &operation, options, config)
}

#[tracing::instrument(level = "info", skip_all, fields(name = %request.data.name), err)]
pub fn create_cluster<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    request: &ClusterOutputRequest,
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    let operation = Operation {
        cluster: Some(request),
        ..Operation::default()
    };
    compose(ledger, &operation, options, config)
}

pub fn transfer_spore<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    target: &TransferTarget,
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    transfer_multiple_spores(ledger, slice::from_ref(target), options, config)
}

#[tracing::instrument(level = "info", skip_all, fields(spores = targets.len()), err)]
pub fn transfer_multiple_spores<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    targets: &[TransferTarget],
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    if targets.is_empty() {
        return Err(SporeError::InvalidRequest("no spores to transfer".to_string()));
    }
    let operation = Operation {
        transfers: targets,
        ..Operation::default()
    };
    compose(ledger, &operation, options, config)
}

pub fn melt_spore<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    target: &MeltTarget,
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    melt_multiple_spores(ledger, slice::from_ref(target), options, config)
}

#[tracing::instrument(level = "info", skip_all, fields(spores = targets.len()), err)]
pub fn melt_multiple_spores<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    targets: &[MeltTarget],
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    if targets.is_empty() {
        return Err(SporeError::InvalidRequest("no spores to melt".to_string()));
    }
    let operation = Operation {
        melts: targets,
        ..Operation::default()
    };
    compose(ledger, &operation, options, config)
}

pub fn melt_then_create_spore<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    melt: &MeltTarget,
    request: &SporeOutputRequest,
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    melt_multiple_then_create_spore(ledger, slice::from_ref(melt), request, options, config)
}

/// Melt `melts` and mint one spore in a single balancing pass.
///
/// The melted capacity funds the new spore. Change is only redeemed when the
/// freed capacity also covers the fee and a change cell; otherwise more
/// funding is collected.
#[tracing::instrument(level = "info", skip_all, fields(melts = melts.len()), err)]
pub fn melt_multiple_then_create_spore<L: CellProvider + FeeRateProvider + ?Sized>(
    ledger: &L,
    melts: &[MeltTarget],
    request: &SporeOutputRequest,
    options: &ComposeOptions,
    config: &SporeConfig,
) -> Result<Composed, SporeError> {
    if melts.is_empty() {
        return Err(SporeError::InvalidRequest("no spores to melt".to_string()));
    }
    let operation = Operation {
        melts,
        spores: slice::from_ref(request),
        ..Operation::default()
    };
    compose(ledger, &operation, options, config)
}
