use thiserror::Error;

use crate::types::OutPoint;

#[derive(Debug, Error)]
pub enum SporeError {
    #[error("Cell not found: {0}")]
    CellNotFound(OutPoint),

    #[error("Cell already spent: {0}")]
    AlreadySpent(OutPoint),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Insufficient funding: required {required} shannons, available {available}")]
    InsufficientFunding { required: u64, available: u64 },

    #[error("Oversized transaction: {size} bytes exceeds limit of {limit} bytes")]
    OversizedTransaction { size: u64, limit: u64 },

    #[error("Malformed witness: {0}")]
    MalformedWitness(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid cell data: {0}")]
    InvalidCellData(String),

    #[error("Invalid content type: {0}")]
    ContentType(String),

    #[error("Capacity overflow: {0}")]
    CapacityOverflow(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Layout error: {0}")]
    Layout(String),
}
