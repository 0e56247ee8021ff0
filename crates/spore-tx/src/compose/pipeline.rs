//! Staged assembly pipeline.
//!
//! A [`Composer`] owns the skeleton and is passed by value from stage to stage:
//! prefix cells, melts, transfers, new clusters and spores, postfix cells, and
//! finally [`Composer::settle`]. Settling runs the balancer, whose finalize step
//! derives identifiers and writes the action proof once the input set is fixed.
//!
//! Actions are emitted melts first, then spore transfers, then creations. A
//! spore linked to a cluster is preceded by the transfer action of its linking
//! cell, once per linking cell.

use crate::assembly::balance::{
    BalanceParams, BalancePath, FundingSource, assert_capacity_conservation,
    assert_transaction_size, balance_capacity, pay_fee_by_output,
};
use crate::assembly::consumer::{
    CellHook, InputOptions, Reemit, inject_live_cell, inject_melt_spore, inject_transfer_spore,
    resolve_meltable_spore,
};
use crate::assembly::injector::{
    ClusterOutputRequest, ReferenceTarget, SporeOutputRequest, inject_new_cluster_output,
    inject_new_spore_output,
};
use crate::cobuild::{
    Action, generate_create_cluster_action, generate_create_spore_action,
    generate_melt_spore_action, generate_transfer_agent_action, generate_transfer_cluster_action,
    generate_transfer_spore_action, inject_cobuild_proof,
};
use crate::config::{ScriptKind, ScriptRegistry, SporeConfig};
use crate::error::SporeError;
use crate::provider::CellProvider;
use crate::scripts::inject_type_ids;
use crate::skeleton::TransactionSkeleton;
use crate::types::{Byte32, Cell, OutPoint, Script};

/// Caller-supplied live cell spent around the protocol cells.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraInput {
    /// Must carry its out point.
    pub cell: Cell,
    pub options: InputOptions,
}

impl ExtraInput {
    #[must_use]
    pub fn new(cell: Cell) -> Self {
        Self {
            cell,
            options: InputOptions::default(),
        }
    }
}

/// Caller cells placed before or after the protocol cells.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtraCells {
    pub inputs: Vec<ExtraInput>,
    pub outputs: Vec<Cell>,
}

impl ExtraCells {
    fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MeltTarget {
    pub out_point: OutPoint,
    pub options: InputOptions,
}

impl MeltTarget {
    #[must_use]
    pub fn new(out_point: OutPoint) -> Self {
        Self {
            out_point,
            options: InputOptions::default(),
        }
    }
}

#[derive(Clone)]
pub struct TransferTarget {
    pub out_point: OutPoint,
    pub to_lock: Script,
    pub options: InputOptions,
    /// Resize the re-emitted spore to occupied capacity plus this margin.
    pub capacity_margin: Option<u64>,
    pub update_output: Option<CellHook>,
}

impl TransferTarget {
    #[must_use]
    pub fn new(out_point: OutPoint, to_lock: Script) -> Self {
        Self {
            out_point,
            to_lock,
            options: InputOptions::default(),
            capacity_margin: None,
            update_output: None,
        }
    }
}

/// Where the fee comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeeSource {
    /// Balance with change, collecting from `sources` when the inputs fall short.
    ///
    /// Without `change_lock`, change goes to the first source, then the first
    /// created output's owner, then the first melted spore's owner.
    Funding {
        sources: Vec<FundingSource>,
        change_lock: Option<Script>,
    },
    /// Deduct the fee from the first transferred or created output whose
    /// margin covers it.
    OutputMargin,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Composed {
    pub skeleton: TransactionSkeleton,
    pub fee: u64,
    pub fee_rate: u64,
    /// `None` when the fee was paid from an output margin.
    pub path: Option<BalancePath>,
    pub change_output_index: Option<usize>,
    /// Output that paid the fee from its margin.
    pub fee_output_index: Option<usize>,
    pub spore_outputs: Vec<usize>,
    pub spore_ids: Vec<Byte32>,
    pub cluster_outputs: Vec<usize>,
    pub cluster_ids: Vec<Byte32>,
    /// Outputs paying mutant owners for the new spores.
    pub payment_outputs: Vec<usize>,
    pub melted_inputs: Vec<usize>,
    /// `(input, output)` per transferred spore.
    pub transfers: Vec<(usize, usize)>,
    /// Actions written into the proof, empty for scripts without cobuild.
    pub actions: Vec<Action>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Step {
    MeltSpore { input: usize },
    TransferSpore { input: usize, output: usize },
    TransferCluster { input: usize, output: usize },
    TransferAgent { input: usize, output: usize },
    CreateCluster { output: usize },
    CreateSpore { output: usize },
}

impl Step {
    const fn rank(self) -> u8 {
        match self {
            Self::MeltSpore { .. } => 0,
            Self::TransferSpore { .. } => 1,
            _ => 2,
        }
    }

    const fn kind(self) -> ScriptKind {
        match self {
            Self::MeltSpore { .. } | Self::TransferSpore { .. } | Self::CreateSpore { .. } => {
                ScriptKind::Spore
            }
            Self::TransferCluster { .. } | Self::CreateCluster { .. } => ScriptKind::Cluster,
            Self::TransferAgent { .. } => ScriptKind::ClusterAgent,
        }
    }

    fn subject(self, skeleton: &TransactionSkeleton) -> Option<&Cell> {
        match self {
            Self::MeltSpore { input }
            | Self::TransferSpore { input, .. }
            | Self::TransferCluster { input, .. }
            | Self::TransferAgent { input, .. } => skeleton.inputs().get(input),
            Self::CreateCluster { output } | Self::CreateSpore { output } => {
                skeleton.outputs().get(output)
            }
        }
    }

    fn uses_cobuild(self, skeleton: &TransactionSkeleton, registry: &ScriptRegistry) -> Result<bool, SporeError> {
        let type_script = self
            .subject(skeleton)
            .and_then(|cell| cell.type_script.as_ref())
            .ok_or_else(|| SporeError::InvalidRequest(format!("{self:?} has no typed cell")))?;
        Ok(registry.find(self.kind(), type_script)?.behaviors.cobuild)
    }

    fn generate(self, skeleton: &TransactionSkeleton, registry: &ScriptRegistry) -> Result<Action, SporeError> {
        match self {
            Self::MeltSpore { input } => generate_melt_spore_action(skeleton, registry, input),
            Self::TransferSpore { input, output } => {
                generate_transfer_spore_action(skeleton, registry, input, output)
            }
            Self::TransferCluster { input, output } => {
                generate_transfer_cluster_action(skeleton, registry, input, output)
            }
            Self::TransferAgent { input, output } => {
                generate_transfer_agent_action(skeleton, registry, input, output)
            }
            Self::CreateCluster { output } => generate_create_cluster_action(skeleton, registry, output),
            Self::CreateSpore { output } => generate_create_spore_action(skeleton, registry, output),
        }
    }
}

/// What the stages recorded, replayed by the finalize step.
#[derive(Clone, Debug, Default)]
struct Plan {
    steps: Vec<Step>,
    melted_inputs: Vec<usize>,
    transfers: Vec<(usize, usize)>,
    spore_outputs: Vec<usize>,
    cluster_outputs: Vec<usize>,
    payment_outputs: Vec<usize>,
}

struct Finalized {
    spore_ids: Vec<Byte32>,
    cluster_ids: Vec<Byte32>,
    actions: Vec<Action>,
}

impl Plan {
    fn finalize(
        &self,
        skeleton: &mut TransactionSkeleton,
        anchor: &OutPoint,
        registry: &ScriptRegistry,
    ) -> Result<Finalized, SporeError> {
        let spore_ids = inject_type_ids(skeleton, anchor, &self.spore_outputs)?;
        let cluster_ids = inject_type_ids(skeleton, anchor, &self.cluster_outputs)?;

        let mut steps = self.steps.clone();
        steps.sort_by_key(|step| step.rank());

        let mut actions = Vec::with_capacity(steps.len());
        for step in steps {
            if step.uses_cobuild(skeleton, registry)? {
                actions.push(step.generate(skeleton, registry)?);
            }
        }
        if !actions.is_empty() {
            inject_cobuild_proof(skeleton, actions.clone())?;
        }

        tracing::debug!(
            %anchor,
            spores = spore_ids.len(),
            clusters = cluster_ids.len(),
            actions = actions.len(),
            "finalized outputs"
        );
        Ok(Finalized {
            spore_ids,
            cluster_ids,
            actions,
        })
    }

    fn first_created_output(&self) -> Option<usize> {
        self.spore_outputs
            .first()
            .or_else(|| self.cluster_outputs.first())
            .copied()
    }

    /// Outputs that may pay the fee from their margin, in order.
    fn fee_candidates(&self) -> Vec<usize> {
        self.transfers
            .iter()
            .map(|(_, output)| *output)
            .chain(self.spore_outputs.iter().copied())
            .chain(self.cluster_outputs.iter().copied())
            .collect()
    }
}

/// Transaction under assembly, advanced one stage at a time.
pub struct Composer<'a, P: ?Sized> {
    provider: &'a P,
    config: &'a SporeConfig,
    skeleton: TransactionSkeleton,
    /// Owners of prefix and postfix inputs, in first-seen order.
    extra_locks: Vec<Script>,
    melted_locks: Vec<Script>,
    plan: Plan,
}

impl<'a, P: CellProvider + ?Sized> Composer<'a, P> {
    pub fn new(provider: &'a P, config: &'a SporeConfig) -> Self {
        Self {
            provider,
            config,
            skeleton: TransactionSkeleton::new(),
            extra_locks: Vec::new(),
            melted_locks: Vec::new(),
            plan: Plan::default(),
        }
    }

    #[must_use]
    pub fn skeleton(&self) -> &TransactionSkeleton {
        &self.skeleton
    }

    fn extra(mut self, cells: &ExtraCells, stage: &'static str) -> Result<Self, SporeError> {
        if cells.is_empty() {
            return Ok(self);
        }

        for input in &cells.inputs {
            if !self.extra_locks.contains(&input.cell.lock) {
                self.extra_locks.push(input.cell.lock.clone());
            }
            inject_live_cell(&mut self.skeleton, input.cell.clone(), &input.options, None, None)?;
        }
        for output in &cells.outputs {
            self.skeleton.add_output(output.clone());
        }

        tracing::debug!(
            stage,
            inputs = cells.inputs.len(),
            outputs = cells.outputs.len(),
            "added caller cells"
        );
        Ok(self)
    }

    /// Caller cells placed before every protocol cell. The first prefix input
    /// becomes the identifier anchor.
    pub fn prefix(self, cells: &ExtraCells) -> Result<Self, SporeError> {
        self.extra(cells, "prefix")
    }

    pub fn postfix(self, cells: &ExtraCells) -> Result<Self, SporeError> {
        self.extra(cells, "postfix")
    }

    /// Spend spores without re-emitting them.
    ///
    /// Every target is resolved and checked before the first one is spent, so
    /// an immortal spore fails the stage with nothing added.
    pub fn melt(mut self, targets: &[MeltTarget]) -> Result<Self, SporeError> {
        let cells = targets
            .iter()
            .map(|target| resolve_meltable_spore(self.provider, &target.out_point, self.config))
            .collect::<Result<Vec<_>, _>>()?;

        for (target, cell) in targets.iter().zip(cells) {
            let lock = cell.lock.clone();
            let consumed = inject_melt_spore(&mut self.skeleton, cell, &target.options, self.config)?;

            self.plan.steps.push(Step::MeltSpore {
                input: consumed.input_index,
            });
            self.plan.melted_inputs.push(consumed.input_index);
            self.melted_locks.push(lock);
        }
        Ok(self)
    }

    pub fn transfer(mut self, targets: &[TransferTarget]) -> Result<Self, SporeError> {
        for target in targets {
            let reemit = Reemit {
                to_lock: Some(target.to_lock.clone()),
                capacity_margin: target.capacity_margin,
                update_output: target.update_output.clone(),
            };
            let consumed = inject_transfer_spore(
                &mut self.skeleton,
                self.provider,
                &target.out_point,
                &target.options,
                &reemit,
                self.config,
            )?;
            let output = consumed.output_index.ok_or_else(|| {
                SporeError::InvalidRequest(format!("spore {} was not re-emitted", target.out_point))
            })?;

            self.plan.steps.push(Step::TransferSpore {
                input: consumed.input_index,
                output,
            });
            self.plan.transfers.push((consumed.input_index, output));
        }
        Ok(self)
    }

    pub fn create_cluster(mut self, request: &ClusterOutputRequest) -> Result<Self, SporeError> {
        let output = inject_new_cluster_output(&mut self.skeleton, request, self.config)?;
        self.plan.steps.push(Step::CreateCluster { output });
        self.plan.cluster_outputs.push(output);
        Ok(self)
    }

    pub fn create_spores(mut self, requests: &[SporeOutputRequest]) -> Result<Self, SporeError> {
        for request in requests {
            let injected = inject_new_spore_output(&mut self.skeleton, self.provider, request, self.config)?;
            let reference = injected.reference;

            if let (Some(input), Some(output)) =
                (reference.linked_input_index, reference.linked_output_index)
            {
                let link_step = match reference.target {
                    ReferenceTarget::Cluster => Some(Step::TransferCluster { input, output }),
                    ReferenceTarget::ClusterAgent => Some(Step::TransferAgent { input, output }),
                    ReferenceTarget::None => None,
                };
                if let Some(step) = link_step.filter(|step| !self.plan.steps.contains(step)) {
                    self.plan.steps.push(step);
                }
            }

            self.plan.steps.push(Step::CreateSpore {
                output: injected.output_index,
            });
            self.plan.spore_outputs.push(injected.output_index);
            self.plan.payment_outputs.extend(injected.payment_outputs);
        }
        Ok(self)
    }

    fn change_lock(&self, sources: &[FundingSource], explicit: Option<&Script>) -> Result<Script, SporeError> {
        explicit
            .or_else(|| sources.first().map(|source| &source.lock))
            .or_else(|| {
                self.plan
                    .first_created_output()
                    .and_then(|index| self.skeleton.outputs().get(index))
                    .map(|cell| &cell.lock)
            })
            .or_else(|| self.melted_locks.first())
            .or_else(|| self.extra_locks.first())
            .cloned()
            .ok_or_else(|| {
                SporeError::InvalidRequest("no lock available to receive change".to_string())
            })
    }

    /// Balance the transaction and write identifiers and actions.
    pub fn settle(self, fee_source: &FeeSource, fee_rate: u64) -> Result<Composed, SporeError> {
        let registry = &self.config.scripts;
        let mut finalized = None;
        let plan = &self.plan;
        let mut finalize = |mut skeleton: TransactionSkeleton,
                        anchor: &OutPoint|
         -> Result<TransactionSkeleton, SporeError> {
            finalized = Some(plan.finalize(&mut skeleton, anchor, registry)?);
            Ok(skeleton)
        };

        let (skeleton, fee, path, change_output_index, fee_output_index) = match fee_source {
            FeeSource::Funding {
                sources,
                change_lock,
            } => {
                let change_lock = self.change_lock(sources, change_lock.as_ref())?;
                let mut sources = sources.clone();
                for lock in &self.extra_locks {
                    if !sources.iter().any(|source| &source.lock == lock) {
                        sources.push(FundingSource::new(lock.clone()));
                    }
                }

                let params = BalanceParams {
                    sources: &sources,
                    change_lock: &change_lock,
                    fee_rate,
                    max_transaction_size: self.config.max_transaction_size,
                };
                let balanced = balance_capacity(self.skeleton, &params, self.provider, finalize)?;
                (
                    balanced.skeleton,
                    balanced.fee,
                    Some(balanced.path),
                    Some(balanced.change_output_index),
                    None,
                )
            }
            FeeSource::OutputMargin => {
                let candidates = plan.fee_candidates();
                if candidates.is_empty() {
                    return Err(SporeError::InvalidRequest(
                        "no transferred or created output has a margin to pay the fee from".to_string(),
                    ));
                }
                let anchor = self.skeleton.first_input_out_point()?;
                let mut skeleton = finalize(self.skeleton, &anchor)?;
                let (fee, payer) = pay_fee_by_output(&mut skeleton, &candidates, fee_rate)?;
                assert_capacity_conservation(&skeleton, fee)?;
                assert_transaction_size(&skeleton, self.config.max_transaction_size)?;
                (skeleton, fee, None, None, payer)
            }
        };

        let finalized = finalized.ok_or_else(|| {
            SporeError::InvalidRequest("settled without finalizing outputs".to_string())
        })?;

        tracing::info!(
            fee,
            fee_rate,
            ?path,
            inputs = skeleton.inputs().len(),
            outputs = skeleton.outputs().len(),
            actions = finalized.actions.len(),
            "settled transaction"
        );

        Ok(Composed {
            skeleton,
            fee,
            fee_rate,
            path,
            change_output_index,
            fee_output_index,
            spore_outputs: plan.spore_outputs.clone(),
            spore_ids: finalized.spore_ids,
            cluster_outputs: plan.cluster_outputs.clone(),
            cluster_ids: finalized.cluster_ids,
            payment_outputs: plan.payment_outputs.clone(),
            melted_inputs: plan.melted_inputs.clone(),
            transfers: plan.transfers.clone(),
            actions: finalized.actions,
        })
    }
}
