//! Witness proof envelope and its placement in the transaction.
//!
//! A witness slot holds either raw bytes (typically a packed `WitnessArgs`) or a
//! tagged layout. Layout tags live in the reserved range starting at
//! `0xFF000000`, which a raw witness can never start with since its first word
//! is its own total size.
//!
//! # Placement
//!
//! The proof goes into slot 0, the witness of the first input's lock group:
//! - an existing `SighashAll` layout gets the new actions appended to its message
//! - a `SighashAllOnly` layout is upgraded, keeping its seal
//! - an empty witness or a placeholder `WitnessArgs` is replaced, and the zeroed
//!   signature bytes become the seal so the reserved size is kept
//! - anything else keeps its slot and the proof is appended after every witness

use crate::cobuild::action::Action;
use crate::error::SporeError;
use crate::molecules::{self, ActionLayout, MessageLayout, SighashAll, SighashAllOnly};
use crate::skeleton::TransactionSkeleton;
use crate::types::WitnessArgs;

/// First tag of the reserved layout range.
const LAYOUT_TAG_BASE: u32 = 0xFF00_0000;
const SIGHASH_ALL: u32 = 0xFF00_0001;
const SIGHASH_ALL_ONLY: u32 = 0xFF00_0002;

/// Slot the proof is written into.
pub const PROOF_WITNESS_SLOT: usize = 0;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub actions: Vec<Action>,
}

impl From<&Message> for MessageLayout {
    fn from(message: &Message) -> Self {
        Self {
            actions: message.actions.iter().map(ActionLayout::from).collect(),
        }
    }
}

impl From<MessageLayout> for Message {
    fn from(layout: MessageLayout) -> Self {
        Self {
            actions: layout.actions.into_iter().map(Action::from).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WitnessLayout {
    SighashAll { message: Message, seal: Vec<u8> },
    SighashAllOnly { seal: Vec<u8> },
}

/// Decoded content of one witness slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Witness {
    Layout(WitnessLayout),
    Raw(Vec<u8>),
}

impl WitnessLayout {
    /// Proof envelope carrying `actions` and an empty seal.
    #[must_use]
    pub fn proof(actions: Vec<Action>) -> Self {
        Self::SighashAll {
            message: Message { actions },
            seal: Vec::new(),
        }
    }

    pub fn pack(&self) -> Result<Vec<u8>, SporeError> {
        match self {
            Self::SighashAll { message, seal } => molecules::pack_union(
                SIGHASH_ALL,
                &SighashAll {
                    message: MessageLayout::from(message),
                    seal: seal.clone(),
                },
            ),
            Self::SighashAllOnly { seal } => {
                molecules::pack_union(SIGHASH_ALL_ONLY, &SighashAllOnly { seal: seal.clone() })
            }
        }
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self, SporeError> {
        let (tag, item) = molecules::split_union(bytes).ok_or_else(|| {
            SporeError::MalformedWitness("witness layout: missing tag".to_string())
        })?;
        match tag {
            SIGHASH_ALL => {
                let layout: SighashAll =
                    molecules::unpack(item, "sighash all", SporeError::MalformedWitness)?;
                Ok(Self::SighashAll {
                    message: Message::from(layout.message),
                    seal: layout.seal,
                })
            }
            SIGHASH_ALL_ONLY => {
                let layout: SighashAllOnly =
                    molecules::unpack(item, "sighash all only", SporeError::MalformedWitness)?;
                Ok(Self::SighashAllOnly { seal: layout.seal })
            }
            other => Err(SporeError::MalformedWitness(format!(
                "unrecognized witness layout tag {other:#010x}"
            ))),
        }
    }

    #[must_use]
    pub fn actions(&self) -> &[Action] {
        match self {
            Self::SighashAll { message, .. } => &message.actions,
            Self::SighashAllOnly { .. } => &[],
        }
    }
}

impl Witness {
    /// Classify a witness slot. Reserved tags must decode as a known layout.
    pub fn decode(bytes: &[u8]) -> Result<Self, SporeError> {
        match molecules::split_union(bytes) {
            Some((tag, _)) if tag >= LAYOUT_TAG_BASE => WitnessLayout::unpack(bytes).map(Self::Layout),
            _ => Ok(Self::Raw(bytes.to_vec())),
        }
    }
}

/// Seal bytes to keep when a raw witness is replaced, or `None` if it holds real content.
fn replaceable_seal(raw: &[u8]) -> Option<Vec<u8>> {
    if raw.is_empty() {
        return Some(Vec::new());
    }
    WitnessArgs::unpack(raw)
        .ok()
        .filter(WitnessArgs::is_placeholder)
        .map(|args| args.lock.unwrap_or_default())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofPlacement {
    /// Appended to the message of an existing proof.
    Merged,
    /// Written over a placeholder or a message-less layout.
    Replaced,
    /// Added after every existing witness.
    Appended,
}

/// Write `actions` into the proof slot. Returns the slot index and how it was placed.
pub fn inject_cobuild_proof(
    skeleton: &mut TransactionSkeleton,
    actions: Vec<Action>,
) -> Result<(usize, ProofPlacement), SporeError> {
    let action_count = actions.len();
    let current = skeleton.witness(PROOF_WITNESS_SLOT).map(Witness::decode).transpose()?;

    let (slot, placement) = match current {
        Some(Witness::Layout(WitnessLayout::SighashAll { mut message, seal })) => {
            message.actions.extend(actions);
            let merged = WitnessLayout::SighashAll { message, seal };
            skeleton.set_witness(PROOF_WITNESS_SLOT, merged.pack()?);
            (PROOF_WITNESS_SLOT, ProofPlacement::Merged)
        }
        Some(Witness::Layout(WitnessLayout::SighashAllOnly { seal })) => {
            let upgraded = WitnessLayout::SighashAll {
                message: Message { actions },
                seal,
            };
            skeleton.set_witness(PROOF_WITNESS_SLOT, upgraded.pack()?);
            (PROOF_WITNESS_SLOT, ProofPlacement::Replaced)
        }
        Some(Witness::Raw(raw)) => match replaceable_seal(&raw) {
            Some(seal) => {
                let proof = WitnessLayout::SighashAll {
                    message: Message { actions },
                    seal,
                };
                skeleton.set_witness(PROOF_WITNESS_SLOT, proof.pack()?);
                (PROOF_WITNESS_SLOT, ProofPlacement::Replaced)
            }
            None => {
                let slot = skeleton.push_witness(WitnessLayout::proof(actions).pack()?);
                (slot, ProofPlacement::Appended)
            }
        },
        None => {
            let slot = skeleton.push_witness(WitnessLayout::proof(actions).pack()?);
            (slot, ProofPlacement::Appended)
        }
    };

    tracing::debug!(slot, ?placement, action_count, "injected cobuild proof");
    Ok((slot, placement))
}

/// Actions carried by the proof in `skeleton`, if any slot holds one.
pub fn find_cobuild_proof(skeleton: &TransactionSkeleton) -> Result<Option<Vec<Action>>, SporeError> {
    for witness in skeleton.witnesses() {
        if let Witness::Layout(WitnessLayout::SighashAll { message, .. }) = Witness::decode(witness)? {
            return Ok(Some(message.actions));
        }
    }
    Ok(None)
}
