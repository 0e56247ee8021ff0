pub mod action;
pub mod witness;

pub use action::{
    Action, SporeAction, decode_actions, encode_actions, generate_create_cluster_action,
    generate_create_spore_action, generate_melt_spore_action, generate_transfer_agent_action,
    generate_transfer_cluster_action, generate_transfer_spore_action,
};
pub use witness::{
    Message, PROOF_WITNESS_SLOT, ProofPlacement, Witness, WitnessLayout, find_cobuild_proof,
    inject_cobuild_proof,
};
