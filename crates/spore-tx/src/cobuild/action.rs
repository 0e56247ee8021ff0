//! Action records describing each protocol mutation in a transaction.
//!
//! An [`Action`] names the script it concerns (by script hash and script info
//! hash) and carries a packed [`SporeAction`] as its data. Generators read the
//! cells at the given input/output indices, so they must run once those indices
//! and the type identifiers are final.

use crate::config::{ScriptKind, ScriptRegistry};
use crate::error::SporeError;
use crate::molecules::{
    self, ActionLayout, Address, BurnSpore, MessageLayout, MintCluster, MintSpore, ScriptLayout,
    TransferCluster, TransferSpore,
};
use crate::scripts::{hash_bytes, hash_script};
use crate::skeleton::TransactionSkeleton;
use crate::types::{Byte32, Cell, Script};

const MINT_SPORE: u32 = 0;
const TRANSFER_SPORE: u32 = 1;
const BURN_SPORE: u32 = 2;
const MINT_CLUSTER: u32 = 3;
const TRANSFER_CLUSTER: u32 = 4;
const TRANSFER_AGENT: u32 = 9;

/// Protocol-level mutation carried inside an [`Action`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SporeAction {
    MintSpore {
        spore_id: Byte32,
        to: Script,
        data_hash: Byte32,
    },
    TransferSpore {
        spore_id: Byte32,
        from: Script,
        to: Script,
    },
    BurnSpore {
        spore_id: Byte32,
        from: Script,
    },
    MintCluster {
        cluster_id: Byte32,
        to: Script,
        data_hash: Byte32,
    },
    TransferCluster {
        cluster_id: Byte32,
        from: Script,
        to: Script,
    },
    TransferAgent {
        cluster_id: Byte32,
        from: Script,
        to: Script,
    },
}

fn address(script: &Script) -> Address {
    Address::Script(ScriptLayout::from(script))
}

fn address_script(address: Address) -> Result<Script, SporeError> {
    match address {
        Address::Script(layout) => layout.into_script().ok_or_else(|| {
            SporeError::MalformedWitness("spore action: address has an unknown hash type".to_string())
        }),
    }
}

fn unpack_item<T: serde::de::DeserializeOwned>(item: &[u8]) -> Result<T, SporeError> {
    molecules::unpack(item, "spore action", SporeError::MalformedWitness)
}

impl SporeAction {
    pub fn pack(&self) -> Result<Vec<u8>, SporeError> {
        match self {
            Self::MintSpore {
                spore_id,
                to,
                data_hash,
            } => molecules::pack_union(
                MINT_SPORE,
                &MintSpore {
                    spore_id: *spore_id,
                    to: address(to),
                    data_hash: *data_hash,
                },
            ),
            Self::TransferSpore { spore_id, from, to } => molecules::pack_union(
                TRANSFER_SPORE,
                &TransferSpore {
                    spore_id: *spore_id,
                    from: address(from),
                    to: address(to),
                },
            ),
            Self::BurnSpore { spore_id, from } => molecules::pack_union(
                BURN_SPORE,
                &BurnSpore {
                    spore_id: *spore_id,
                    from: address(from),
                },
            ),
            Self::MintCluster {
                cluster_id,
                to,
                data_hash,
            } => molecules::pack_union(
                MINT_CLUSTER,
                &MintCluster {
                    cluster_id: *cluster_id,
                    to: address(to),
                    data_hash: *data_hash,
                },
            ),
            Self::TransferCluster {
                cluster_id,
                from,
                to,
            } => molecules::pack_union(
                TRANSFER_CLUSTER,
                &TransferCluster {
                    cluster_id: *cluster_id,
                    from: address(from),
                    to: address(to),
                },
            ),
            Self::TransferAgent {
                cluster_id,
                from,
                to,
            } => molecules::pack_union(
                TRANSFER_AGENT,
                &TransferCluster {
                    cluster_id: *cluster_id,
                    from: address(from),
                    to: address(to),
                },
            ),
        }
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, SporeError> {
        let (item_id, item) = molecules::split_union(bytes).ok_or_else(|| {
            SporeError::MalformedWitness("spore action: missing item id".to_string())
        })?;

        Ok(match item_id {
            MINT_SPORE => {
                let mint: MintSpore = unpack_item(item)?;
                Self::MintSpore {
                    spore_id: mint.spore_id,
                    to: address_script(mint.to)?,
                    data_hash: mint.data_hash,
                }
            }
            TRANSFER_SPORE => {
                let transfer: TransferSpore = unpack_item(item)?;
                Self::TransferSpore {
                    spore_id: transfer.spore_id,
                    from: address_script(transfer.from)?,
                    to: address_script(transfer.to)?,
                }
            }
            BURN_SPORE => {
                let burn: BurnSpore = unpack_item(item)?;
                Self::BurnSpore {
                    spore_id: burn.spore_id,
                    from: address_script(burn.from)?,
                }
            }
            MINT_CLUSTER => {
                let mint: MintCluster = unpack_item(item)?;
                Self::MintCluster {
                    cluster_id: mint.cluster_id,
                    to: address_script(mint.to)?,
                    data_hash: mint.data_hash,
                }
            }
            TRANSFER_CLUSTER => {
                let transfer: TransferCluster = unpack_item(item)?;
                Self::TransferCluster {
                    cluster_id: transfer.cluster_id,
                    from: address_script(transfer.from)?,
                    to: address_script(transfer.to)?,
                }
            }
            TRANSFER_AGENT => {
                let transfer: TransferCluster = unpack_item(item)?;
                Self::TransferAgent {
                    cluster_id: transfer.cluster_id,
                    from: address_script(transfer.from)?,
                    to: address_script(transfer.to)?,
                }
            }
            other => {
                return Err(SporeError::MalformedWitness(format!(
                    "spore action: unknown item id {other}"
                )));
            }
        })
    }
}

/// One action record as written into the proof witness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub script_info_hash: Byte32,
    pub script_hash: Byte32,
    pub data: Vec<u8>,
}

impl Action {
    pub fn new(
        script_info_hash: Byte32,
        type_script: &Script,
        action: &SporeAction,
    ) -> Result<Self, SporeError> {
        Ok(Self {
            script_info_hash,
            script_hash: hash_script(type_script),
            data: action.pack()?,
        })
    }

    /// Decode the protocol mutation carried in `data`.
    pub fn spore_action(&self) -> Result<SporeAction, SporeError> {
        SporeAction::unpack(&self.data)
    }
}

impl From<&Action> for ActionLayout {
    fn from(action: &Action) -> Self {
        Self {
            script_info_hash: action.script_info_hash,
            script_hash: action.script_hash,
            data: action.data.clone(),
        }
    }
}

impl From<ActionLayout> for Action {
    fn from(layout: ActionLayout) -> Self {
        Self {
            script_info_hash: layout.script_info_hash,
            script_hash: layout.script_hash,
            data: layout.data,
        }
    }
}

/// Pack an ordered action list as a cobuild message.
pub fn encode_actions(actions: &[Action]) -> Result<Vec<u8>, SporeError> {
    molecules::pack(&MessageLayout {
        actions: actions.iter().map(ActionLayout::from).collect(),
    })
}

/// Decode a cobuild message, rejecting truncated or inconsistent layouts.
pub fn decode_actions(bytes: &[u8]) -> Result<Vec<Action>, SporeError> {
    let message: MessageLayout = molecules::unpack(bytes, "action list", SporeError::MalformedWitness)?;
    Ok(message.actions.into_iter().map(Action::from).collect())
}

fn input_at(skeleton: &TransactionSkeleton, index: usize) -> Result<&Cell, SporeError> {
    skeleton.inputs().get(index).ok_or_else(|| {
        SporeError::InvalidRequest(format!("action references missing input {index}"))
    })
}

fn output_at(skeleton: &TransactionSkeleton, index: usize) -> Result<&Cell, SporeError> {
    skeleton.outputs().get(index).ok_or_else(|| {
        SporeError::InvalidRequest(format!("action references missing output {index}"))
    })
}

/// Type script and its 32-byte identifier.
fn typed<'a>(cell: &'a Cell, side: &str, index: usize) -> Result<(&'a Script, Byte32), SporeError> {
    let type_script = cell.type_script.as_ref().ok_or_else(|| {
        SporeError::InvalidRequest(format!("{side} {index} has no type script"))
    })?;
    let id = Byte32::try_from(type_script.args.as_slice()).map_err(|_| {
        SporeError::InvalidRequest(format!(
            "{side} {index} type args are not a 32-byte identifier"
        ))
    })?;
    Ok((type_script, id))
}

fn build(
    registry: &ScriptRegistry,
    kind: ScriptKind,
    type_script: &Script,
    action: &SporeAction,
) -> Result<Action, SporeError> {
    let info = registry.find(kind, type_script)?;
    Action::new(info.script_info_hash, type_script, action)
}

/// Mint action for the spore at `output_index`.
pub fn generate_create_spore_action(
    skeleton: &TransactionSkeleton,
    registry: &ScriptRegistry,
    output_index: usize,
) -> Result<Action, SporeError> {
    let output = output_at(skeleton, output_index)?;
    let (type_script, spore_id) = typed(output, "output", output_index)?;

    build(
        registry,
        ScriptKind::Spore,
        type_script,
        &SporeAction::MintSpore {
            spore_id,
            to: output.lock.clone(),
            data_hash: hash_bytes(&output.data),
        },
    )
}

pub fn generate_transfer_spore_action(
    skeleton: &TransactionSkeleton,
    registry: &ScriptRegistry,
    input_index: usize,
    output_index: usize,
) -> Result<Action, SporeError> {
    let input = input_at(skeleton, input_index)?;
    let output = output_at(skeleton, output_index)?;
    let (type_script, spore_id) = typed(input, "input", input_index)?;

    build(
        registry,
        ScriptKind::Spore,
        type_script,
        &SporeAction::TransferSpore {
            spore_id,
            from: input.lock.clone(),
            to: output.lock.clone(),
        },
    )
}

pub fn generate_melt_spore_action(
    skeleton: &TransactionSkeleton,
    registry: &ScriptRegistry,
    input_index: usize,
) -> Result<Action, SporeError> {
    let input = input_at(skeleton, input_index)?;
    let (type_script, spore_id) = typed(input, "input", input_index)?;

    build(
        registry,
        ScriptKind::Spore,
        type_script,
        &SporeAction::BurnSpore {
            spore_id,
            from: input.lock.clone(),
        },
    )
}

pub fn generate_create_cluster_action(
    skeleton: &TransactionSkeleton,
    registry: &ScriptRegistry,
    output_index: usize,
) -> Result<Action, SporeError> {
    let output = output_at(skeleton, output_index)?;
    let (type_script, cluster_id) = typed(output, "output", output_index)?;

    build(
        registry,
        ScriptKind::Cluster,
        type_script,
        &SporeAction::MintCluster {
            cluster_id,
            to: output.lock.clone(),
            data_hash: hash_bytes(&output.data),
        },
    )
}

pub fn generate_transfer_cluster_action(
    skeleton: &TransactionSkeleton,
    registry: &ScriptRegistry,
    input_index: usize,
    output_index: usize,
) -> Result<Action, SporeError> {
    let input = input_at(skeleton, input_index)?;
    let output = output_at(skeleton, output_index)?;
    let (type_script, cluster_id) = typed(input, "input", input_index)?;

    build(
        registry,
        ScriptKind::Cluster,
        type_script,
        &SporeAction::TransferCluster {
            cluster_id,
            from: input.lock.clone(),
            to: output.lock.clone(),
        },
    )
}

/// Transfer action for a cluster agent. The agent's type args hold the cluster id.
pub fn generate_transfer_agent_action(
    skeleton: &TransactionSkeleton,
    registry: &ScriptRegistry,
    input_index: usize,
    output_index: usize,
) -> Result<Action, SporeError> {
    let input = input_at(skeleton, input_index)?;
    let output = output_at(skeleton, output_index)?;
    let (type_script, cluster_id) = typed(input, "input", input_index)?;

    build(
        registry,
        ScriptKind::ClusterAgent,
        type_script,
        &SporeAction::TransferAgent {
            cluster_id,
            from: input.lock.clone(),
            to: output.lock.clone(),
        },
    )
}
