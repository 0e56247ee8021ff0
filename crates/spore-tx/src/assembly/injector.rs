//! Building new spore and cluster outputs.
//!
//! New typed outputs are written with a zeroed 32-byte identifier in their type
//! args. The real identifier depends on the final first input and is written
//! later by [`crate::scripts::inject_type_ids`].
//!
//! A spore whose content type lists `mutant[]` ids takes each mutant cell as a
//! code dependency and pays the mutant's owner any minimum its args demand.

use std::sync::Arc;

use crate::assembly::consumer::{
    CellHook, InputOptions, Reemit, capacity_with_margin, finish_output, inject_live_cell,
    script_cell_dep,
};
use crate::config::{ScriptKind, SporeConfig};
use crate::data::{ClusterData, MutantArgs, SporeData};
use crate::error::SporeError;
use crate::provider::{
    CellProvider, get_cluster_agent_by_out_point, get_cluster_by_out_point, get_mutant_by_id,
};
use crate::skeleton::TransactionSkeleton;
use crate::types::{Byte32, Cell, CellDep, DepType, ONE_CKB, OutPoint, Script};

/// Type args written before the identifier is derived.
const PENDING_ID: [u8; 32] = [0; 32];

/// Picks the payment to a mutant's owner from the minimum payment, the owner's
/// lock and the mutant cell. Amounts below the minimum are rejected.
pub type PaymentHook = Arc<dyn Fn(u64, &Script, &Cell) -> u64 + Send + Sync>;

/// Which cell a new spore's cluster link goes through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceTarget {
    None,
    Cluster,
    ClusterAgent,
}

/// Link produced by injecting a spore, consumed by action generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reference {
    pub target: ReferenceTarget,
    /// Input spending the linking cell.
    pub linked_input_index: Option<usize>,
    /// Output re-emitting the linking cell.
    pub linked_output_index: Option<usize>,
}

impl Reference {
    const UNLINKED: Self = Self {
        target: ReferenceTarget::None,
        linked_input_index: None,
        linked_output_index: None,
    };
}

/// How a spore reaches the cluster named by its `cluster_id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterLink {
    /// Spend and re-emit the cluster cell itself.
    Cluster { cluster: OutPoint },
    /// Spend and re-emit an agent of the cluster; the cluster cell becomes a dependency.
    Agent { agent: OutPoint, cluster: OutPoint },
}

/// Options for the linking cell written back to the transaction.
#[derive(Clone, Default)]
pub struct LinkOptions {
    pub witness: Option<Vec<u8>>,
    pub capacity_margin: Option<u64>,
    pub update_output: Option<CellHook>,
}

#[derive(Clone)]
pub struct SporeOutputRequest {
    pub data: SporeData,
    pub to_lock: Script,
    /// Capacity above the occupied minimum, often used to pay future fees.
    pub capacity_margin: u64,
    pub update_output: Option<CellHook>,
    pub cluster_link: Option<ClusterLink>,
    pub link_options: LinkOptions,
    /// Without a hook every mutant is paid exactly its minimum.
    pub payment_amount: Option<PaymentHook>,
    pub skip_content_type_check: bool,
}

impl SporeOutputRequest {
    #[must_use]
    pub fn new(data: SporeData, to_lock: Script) -> Self {
        Self {
            data,
            to_lock,
            capacity_margin: ONE_CKB,
            update_output: None,
            cluster_link: None,
            link_options: LinkOptions::default(),
            payment_amount: None,
            skip_content_type_check: false,
        }
    }
}

#[derive(Clone)]
pub struct ClusterOutputRequest {
    pub data: ClusterData,
    pub to_lock: Script,
    pub capacity_margin: u64,
    pub update_output: Option<CellHook>,
}

impl ClusterOutputRequest {
    #[must_use]
    pub fn new(data: ClusterData, to_lock: Script) -> Self {
        Self {
            data,
            to_lock,
            capacity_margin: ONE_CKB,
            update_output: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InjectedOutput {
    pub output_index: usize,
    pub reference: Reference,
    /// Outputs paying mutant owners, in `mutant[]` order.
    pub payment_outputs: Vec<usize>,
}

/// A mutant the new spore opts into.
struct MutantUse {
    cell_dep: CellDep,
    payment: Option<Cell>,
}

fn mutant_payment(min_payment: u64, mutant: &Cell, hook: Option<&PaymentHook>) -> Result<Cell, SporeError> {
    let amount = hook.map_or(min_payment, |hook| hook(min_payment, &mutant.lock, mutant));
    if amount < min_payment {
        return Err(SporeError::InvalidRequest(format!(
            "mutant payment of {amount} shannons is below the minimum of {min_payment}"
        )));
    }
    let mut payment = Cell::new(0, mutant.lock.clone(), None, Vec::new());
    payment.capacity = amount.max(payment.occupied_capacity()?);
    Ok(payment)
}

/// Resolve every mutant listed by the spore's content type.
fn resolve_mutants<P: CellProvider + ?Sized>(
    provider: &P,
    request: &SporeOutputRequest,
    config: &SporeConfig,
) -> Result<Vec<MutantUse>, SporeError> {
    let ids = match request.data.parsed_content_type().and_then(|parsed| parsed.mutant_ids()) {
        Ok(ids) => ids,
        Err(_) if request.skip_content_type_check => Vec::new(),
        Err(err) => return Err(err),
    };

    ids.iter()
        .map(|id| {
            let mutant = get_mutant_by_id(provider, id, config)?;
            let (Some(out_point), Some(type_script)) = (mutant.out_point, mutant.type_script.as_ref()) else {
                return Err(SporeError::InvalidRequest(format!(
                    "mutant 0x{} resolved to an untyped cell",
                    hex::encode(id)
                )));
            };
            let args = MutantArgs::parse(&type_script.args)?;
            let payment = args
                .min_payment
                .map(|min_payment| mutant_payment(min_payment, &mutant, request.payment_amount.as_ref()))
                .transpose()?;

            Ok(MutantUse {
                cell_dep: CellDep::new(out_point, DepType::Code),
                payment,
            })
        })
        .collect()
}

/// 32-byte identifier held in a typed cell's args.
fn type_id_of(cell: &Cell) -> Option<Byte32> {
    cell.type_script
        .as_ref()
        .and_then(|script| script.args.get(..32))
        .and_then(|args| Byte32::try_from(args).ok())
}

/// Reuse a linking cell already spent by an earlier spore in the same transaction.
fn existing_link(skeleton: &TransactionSkeleton, out_point: &OutPoint, target: ReferenceTarget) -> Option<Reference> {
    let input_index = skeleton
        .inputs()
        .iter()
        .position(|cell| cell.out_point.as_ref() == Some(out_point))?;
    let type_script = skeleton.inputs()[input_index].type_script.as_ref();
    let output_index = skeleton
        .outputs()
        .iter()
        .position(|cell| cell.type_script.as_ref() == type_script);

    Some(Reference {
        target,
        linked_input_index: Some(input_index),
        linked_output_index: output_index,
    })
}

fn spend_link(
    skeleton: &mut TransactionSkeleton,
    cell: Cell,
    kind: ScriptKind,
    target: ReferenceTarget,
    options: &LinkOptions,
    config: &SporeConfig,
) -> Result<Reference, SporeError> {
    let cell_dep = script_cell_dep(&cell, kind, config)?;
    let input_options = InputOptions {
        witness: options.witness.clone(),
        since: None,
    };
    let reemit = Reemit {
        to_lock: None,
        capacity_margin: options.capacity_margin,
        update_output: options.update_output.clone(),
    };
    let consumed = inject_live_cell(skeleton, cell, &input_options, Some(&reemit), Some(cell_dep))?;

    Ok(Reference {
        target,
        linked_input_index: Some(consumed.input_index),
        linked_output_index: consumed.output_index,
    })
}

/// Resolve the cluster, check its policy and wire the link into the skeleton.
fn link_cluster<P: CellProvider + ?Sized>(
    skeleton: &mut TransactionSkeleton,
    provider: &P,
    cluster_id: Byte32,
    link: ClusterLink,
    request: &SporeOutputRequest,
    config: &SporeConfig,
) -> Result<Reference, SporeError> {
    let cluster_out_point = match link {
        ClusterLink::Cluster { cluster } | ClusterLink::Agent { cluster, .. } => cluster,
    };
    let cluster_cell = get_cluster_by_out_point(provider, &cluster_out_point, config)?;
    if type_id_of(&cluster_cell) != Some(cluster_id) {
        return Err(SporeError::InvalidRequest(format!(
            "cluster cell {cluster_out_point} does not hold cluster 0x{}",
            hex::encode(cluster_id)
        )));
    }
    ClusterData::unpack(&cluster_cell.data)?.check_spore_policy(&request.data)?;

    match link {
        ClusterLink::Cluster { cluster } => {
            if let Some(reference) = existing_link(skeleton, &cluster, ReferenceTarget::Cluster) {
                return Ok(reference);
            }
            spend_link(
                skeleton,
                cluster_cell,
                ScriptKind::Cluster,
                ReferenceTarget::Cluster,
                &request.link_options,
                config,
            )
        }
        ClusterLink::Agent { agent, cluster } => {
            let reference = match existing_link(skeleton, &agent, ReferenceTarget::ClusterAgent) {
                Some(reference) => reference,
                None => {
                    let agent_cell = get_cluster_agent_by_out_point(provider, &agent, config)?;
                    if type_id_of(&agent_cell) != Some(cluster_id) {
                        return Err(SporeError::InvalidRequest(format!(
                            "agent cell {agent} does not act for cluster 0x{}",
                            hex::encode(cluster_id)
                        )));
                    }
                    spend_link(
                        skeleton,
                        agent_cell,
                        ScriptKind::ClusterAgent,
                        ReferenceTarget::ClusterAgent,
                        &request.link_options,
                        config,
                    )?
                }
            };
            skeleton.add_cell_dep(CellDep::new(cluster, DepType::Code));
            Ok(reference)
        }
    }
}

/// Append a new spore output, linking it to its cluster when it names one.
pub fn inject_new_spore_output<P: CellProvider + ?Sized>(
    skeleton: &mut TransactionSkeleton,
    provider: &P,
    request: &SporeOutputRequest,
    config: &SporeConfig,
) -> Result<InjectedOutput, SporeError> {
    if !request.skip_content_type_check {
        request.data.validate()?;
    }

    let mutants = resolve_mutants(provider, request, config)?;

    let script_info = config.scripts.latest(ScriptKind::Spore)?;
    let mut cell = Cell::new(
        0,
        request.to_lock.clone(),
        Some(script_info.script(PENDING_ID.to_vec())),
        request.data.pack()?,
    );
    cell.capacity = capacity_with_margin(&cell, request.capacity_margin)?;
    let cell = finish_output(cell, request.update_output.as_ref())?;

    let reference = match (request.data.cluster_id, request.cluster_link) {
        (None, None) => Reference::UNLINKED,
        (Some(cluster_id), Some(link)) => {
            link_cluster(skeleton, provider, cluster_id, link, request, config)?
        }
        (Some(cluster_id), None) => {
            return Err(SporeError::InvalidRequest(format!(
                "spore names cluster 0x{} but no cluster or agent cell was given",
                hex::encode(cluster_id)
            )));
        }
        (None, Some(_)) => {
            return Err(SporeError::InvalidRequest(
                "a cluster link was given for a spore without cluster id".to_string(),
            ));
        }
    };

    let output_index = skeleton.add_output(cell);
    skeleton.add_cell_dep(script_info.cell_dep);

    let mut payment_outputs = Vec::new();
    for mutant in mutants {
        skeleton.add_cell_dep(mutant.cell_dep);
        if let Some(payment) = mutant.payment {
            payment_outputs.push(skeleton.add_output(payment));
        }
    }

    tracing::debug!(
        output_index,
        target = ?reference.target,
        payments = payment_outputs.len(),
        "injected spore output"
    );
    Ok(InjectedOutput {
        output_index,
        reference,
        payment_outputs,
    })
}

/// Append a new cluster output.
pub fn inject_new_cluster_output(
    skeleton: &mut TransactionSkeleton,
    request: &ClusterOutputRequest,
    config: &SporeConfig,
) -> Result<usize, SporeError> {
    let script_info = config.scripts.latest(ScriptKind::Cluster)?;
    let mut cell = Cell::new(
        0,
        request.to_lock.clone(),
        Some(script_info.script(PENDING_ID.to_vec())),
        request.data.pack()?,
    );
    cell.capacity = capacity_with_margin(&cell, request.capacity_margin)?;
    let cell = finish_output(cell, request.update_output.as_ref())?;

    let output_index = skeleton.add_output(cell);
    skeleton.add_cell_dep(script_info.cell_dep);

    tracing::debug!(output_index, "injected cluster output");
    Ok(output_index)
}
