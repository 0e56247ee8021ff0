#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
#![cfg_attr(
    test,
    allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        clippy::default_trait_access,
        clippy::iter_on_single_items,
        clippy::needless_pass_by_value,
        clippy::too_many_lines
    )
)]

pub mod assembly;
pub mod cobuild;
pub mod compose;
pub mod config;
pub mod data;
pub mod error;
pub mod molecules;
pub mod provider;
pub mod rpc;
pub mod scripts;
pub mod skeleton;
pub mod types;

pub use assembly::{BalancePath, FundingSource, InputOptions, calculate_fee};
pub use cobuild::{Action, SporeAction, find_cobuild_proof};
pub use compose::*;
pub use config::{FeeRatePolicy, ScriptInfo, ScriptKind, ScriptRegistry, SporeConfig, get_spore_config, set_spore_config};
pub use data::{ClusterData, ContentType, MutantArgs, SporeData};
pub use error::SporeError;
pub use provider::{CellProvider, CellStatus, FeeRateProvider};
pub use rpc::RpcClient;
pub use scripts::{derive_type_id, hash_script};
pub use skeleton::TransactionSkeleton;
pub use types::{Byte32, Cell, CellDep, DepType, HashType, ONE_CKB, OutPoint, Script, WitnessArgs};
