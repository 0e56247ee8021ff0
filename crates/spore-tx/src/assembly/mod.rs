pub mod balance;
pub mod consumer;
pub mod injector;

pub use balance::{
    BalanceParams, BalancePath, Balanced, FundingSource, assert_capacity_conservation,
    assert_transaction_size, balance_capacity, calculate_fee, pay_fee_by_output,
};
pub use consumer::{
    CellHook, ConsumedCell, InputOptions, Reemit, inject_live_cell, inject_melt_spore,
    inject_transfer_spore, resolve_meltable_spore,
};
pub use injector::{
    ClusterLink, ClusterOutputRequest, InjectedOutput, LinkOptions, PaymentHook, Reference, ReferenceTarget,
    SporeOutputRequest, inject_new_cluster_output, inject_new_spore_output,
};
