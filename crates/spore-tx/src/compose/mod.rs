pub mod operations;
pub mod pipeline;

pub use operations::{
    ComposeOptions, create_cluster, create_multiple_spores, create_spore, melt_multiple_spores,
    melt_multiple_then_create_spore, melt_spore, melt_then_create_spore, transfer_multiple_spores,
    transfer_spore,
};
pub use pipeline::{Composed, Composer, ExtraCells, ExtraInput, FeeSource, MeltTarget, TransferTarget};
