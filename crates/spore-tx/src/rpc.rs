//! Blocking JSON-RPC client for a ledger node and its cell indexer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::SporeConfig;
use crate::error::SporeError;
use crate::provider::{CellProvider, CellStatus, FeeRateProvider};
use crate::types::{Cell, OutPoint, Script, hex_byte32, hex_bytes};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Page size for indexer cell searches.
const SEARCH_PAGE_LIMIT: u64 = 100;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonOutPoint {
    #[serde(with = "hex_byte32")]
    tx_hash: [u8; 32],
    index: String,
}

#[derive(Debug, Deserialize)]
struct JsonCellOutput {
    capacity: String,
    lock: Script,
    #[serde(rename = "type")]
    type_script: Option<Script>,
}

#[derive(Debug, Deserialize)]
struct JsonCellData {
    #[serde(with = "hex_bytes")]
    content: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct JsonLiveCell {
    output: JsonCellOutput,
    data: Option<JsonCellData>,
}

#[derive(Debug, Deserialize)]
struct JsonCellWithStatus {
    cell: Option<JsonLiveCell>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct JsonIndexerCell {
    output: JsonCellOutput,
    #[serde(default, with = "hex_bytes")]
    output_data: Vec<u8>,
    out_point: JsonOutPoint,
}

#[derive(Debug, Deserialize)]
struct JsonCellsPage {
    objects: Vec<JsonIndexerCell>,
    last_cursor: String,
}

#[derive(Debug, Deserialize)]
struct JsonTxPoolInfo {
    min_fee_rate: String,
}

fn to_hex_number(value: u64) -> String {
    format!("{value:#x}")
}

fn parse_hex_number(raw: &str) -> Result<u64, SporeError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| SporeError::Rpc(format!("expected 0x-prefixed number, got '{raw}'")))?;
    u64::from_str_radix(digits, 16)
        .map_err(|err| SporeError::Rpc(format!("invalid hex number '{raw}': {err}")))
}

fn to_json_out_point(out_point: &OutPoint) -> JsonOutPoint {
    JsonOutPoint {
        tx_hash: out_point.tx_hash,
        index: to_hex_number(u64::from(out_point.index)),
    }
}

fn from_json_out_point(raw: &JsonOutPoint) -> Result<OutPoint, SporeError> {
    let index = u32::try_from(parse_hex_number(&raw.index)?)
        .map_err(|_| SporeError::Rpc(format!("out point index {} out of range", raw.index)))?;
    Ok(OutPoint::new(raw.tx_hash, index))
}

fn from_json_output(output: JsonCellOutput, data: Vec<u8>) -> Result<Cell, SporeError> {
    Ok(Cell::new(
        parse_hex_number(&output.capacity)?,
        output.lock,
        output.type_script,
        data,
    ))
}

fn cell_status_from_json(raw: JsonCellWithStatus) -> Result<CellStatus, SporeError> {
    match (raw.status.as_str(), raw.cell) {
        ("live", Some(cell)) => {
            let data = cell.data.map(|data| data.content).unwrap_or_default();
            Ok(CellStatus::Live(from_json_output(cell.output, data)?))
        }
        ("live", None) => Err(SporeError::Rpc(
            "node reported a live cell without its content".to_string(),
        )),
        ("dead", _) => Ok(CellStatus::Dead),
        _ => Ok(CellStatus::Unknown),
    }
}

fn search_key(lock: &Script) -> Result<Value, SporeError> {
    Ok(json!({
        "script": serde_json::to_value(lock)?,
        "script_type": "lock",
        "filter": {
            "script_len_range": ["0x0", "0x1"],
            "output_data_len_range": ["0x0", "0x1"],
        },
        "with_data": true,
    }))
}

fn type_search_key(type_script: &Script) -> Result<Value, SporeError> {
    Ok(json!({
        "script": serde_json::to_value(type_script)?,
        "script_type": "type",
        "script_search_mode": "prefix",
        "with_data": true,
    }))
}

/// JSON-RPC client implementing both ledger collaborators.
#[derive(Debug)]
pub struct RpcClient {
    node_url: String,
    indexer_url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    #[must_use]
    pub fn new(node_url: &str, indexer_url: &str) -> Self {
        Self {
            node_url: node_url.trim_end_matches('/').to_owned(),
            indexer_url: indexer_url.trim_end_matches('/').to_owned(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn from_config(config: &SporeConfig) -> Self {
        Self::new(&config.node_url, &config.indexer_url)
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn call<T: DeserializeOwned>(&self, url: &str, method: &str, params: Value) -> Result<T, SporeError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        tracing::debug!(url, method, id = request.id, "rpc call");

        let response = minreq::post(url)
            .with_timeout(self.timeout.as_secs())
            .with_json(&request)
            .map_err(|err| SporeError::Rpc(err.to_string()))?
            .send()
            .map_err(|err| SporeError::Rpc(format!("{method}: {err}")))?;

        if !(200..300).contains(&response.status_code) {
            return Err(SporeError::Rpc(format!(
                "{method}: HTTP {} {}",
                response.status_code, response.reason_phrase
            )));
        }

        let body: RpcResponse<T> = response
            .json()
            .map_err(|err| SporeError::Rpc(format!("{method}: invalid response: {err}")))?;

        if let Some(error) = body.error {
            return Err(SporeError::Rpc(format!(
                "{method}: error {}: {}",
                error.code, error.message
            )));
        }
        body.result
            .ok_or_else(|| SporeError::Rpc(format!("{method}: response has no result")))
    }

    /// Walk indexer pages in ascending order until `visit` returns `true` or
    /// the results run out.
    fn search_cells(&self, key: &Value, mut visit: impl FnMut(Cell) -> bool) -> Result<(), SporeError> {
        let mut cursor: Option<String> = None;
        loop {
            let page: JsonCellsPage = self.call(
                &self.indexer_url,
                "get_cells",
                json!([key, "asc", to_hex_number(SEARCH_PAGE_LIMIT), cursor]),
            )?;
            let page_len = page.objects.len();

            for object in page.objects {
                let out_point = from_json_out_point(&object.out_point)?;
                let cell = from_json_output(object.output, object.output_data)?.with_out_point(out_point);
                if visit(cell) {
                    return Ok(());
                }
            }

            if page_len < SEARCH_PAGE_LIMIT as usize {
                return Ok(());
            }
            cursor = Some(page.last_cursor);
        }
    }
}

impl CellProvider for RpcClient {
    fn get_live_cell(&self, out_point: &OutPoint) -> Result<CellStatus, SporeError> {
        let raw: JsonCellWithStatus = self.call(
            &self.node_url,
            "get_live_cell",
            json!([serde_json::to_value(to_json_out_point(out_point))?, true]),
        )?;
        cell_status_from_json(raw)
    }

    fn collect_cells(&self, lock: &Script, minimum_capacity: u64) -> Result<Vec<Cell>, SporeError> {
        let mut cells = Vec::new();
        let mut collected = 0u64;

        self.search_cells(&search_key(lock)?, |cell| {
            if cell.is_plain() {
                collected = collected.saturating_add(cell.capacity);
                cells.push(cell);
            }
            collected >= minimum_capacity
        })?;

        tracing::debug!(count = cells.len(), collected, minimum_capacity, "collected funding candidates");
        Ok(cells)
    }

    fn find_cells_by_type(&self, type_script: &Script) -> Result<Vec<Cell>, SporeError> {
        let mut cells = Vec::new();
        self.search_cells(&type_search_key(type_script)?, |cell| {
            cells.push(cell);
            false
        })?;

        tracing::debug!(count = cells.len(), code_hash = %hex::encode(type_script.code_hash), "found typed cells");
        Ok(cells)
    }
}

impl FeeRateProvider for RpcClient {
    fn min_fee_rate(&self) -> Result<u64, SporeError> {
        let info: JsonTxPoolInfo = self.call(&self.node_url, "tx_pool_info", json!([]))?;
        parse_hex_number(&info.min_fee_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HashType;

    const LOCK_JSON: &str = r#"{
        "code_hash": "0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8",
        "hash_type": "type",
        "args": "0x0011223344556677889900112233445566778899"
    }"#;

    #[test]
    fn hex_numbers_require_prefix() {
        assert_eq!(parse_hex_number("0x3e8").expect("valid"), 1000);
        assert_eq!(to_hex_number(1000), "0x3e8");
        assert!(matches!(parse_hex_number("1000"), Err(SporeError::Rpc(_))));
        assert!(matches!(parse_hex_number("0xzz"), Err(SporeError::Rpc(_))));
    }

    #[test]
    fn live_cell_response_becomes_cell() {
        let raw: JsonCellWithStatus = serde_json::from_str(&format!(
            r#"{{
                "cell": {{
                    "output": {{ "capacity": "0x174876e800", "lock": {LOCK_JSON}, "type": null }},
                    "data": {{ "content": "0x0102", "hash": "0x00" }}
                }},
                "status": "live"
            }}"#
        ))
        .expect("valid json");

        match cell_status_from_json(raw).expect("converts") {
            CellStatus::Live(cell) => {
                assert_eq!(cell.capacity, 100_000_000_000);
                assert_eq!(cell.lock.hash_type, HashType::Type);
                assert_eq!(cell.lock.args.len(), 20);
                assert_eq!(cell.data, vec![1, 2]);
                assert!(cell.type_script.is_none());
            }
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn dead_and_unknown_statuses() {
        let dead: JsonCellWithStatus =
            serde_json::from_str(r#"{ "cell": null, "status": "dead" }"#).expect("valid json");
        assert_eq!(cell_status_from_json(dead).expect("converts"), CellStatus::Dead);

        let unknown: JsonCellWithStatus =
            serde_json::from_str(r#"{ "cell": null, "status": "unknown" }"#).expect("valid json");
        assert_eq!(cell_status_from_json(unknown).expect("converts"), CellStatus::Unknown);
    }

    #[test]
    fn out_point_json_uses_hex_index() {
        let out_point = OutPoint::new([0xAB; 32], 26);
        let json = serde_json::to_value(to_json_out_point(&out_point)).expect("serializes");
        assert_eq!(json["index"], "0x1a");

        let back: JsonOutPoint = serde_json::from_value(json).expect("deserializes");
        assert_eq!(from_json_out_point(&back).expect("converts"), out_point);
    }

    #[test]
    fn search_key_filters_plain_cells() {
        let lock: Script = serde_json::from_str(LOCK_JSON).expect("valid script");
        let key = search_key(&lock).expect("serializes");
        assert_eq!(key["script_type"], "lock");
        assert_eq!(key["filter"]["output_data_len_range"][1], "0x1");
        assert_eq!(key["script"]["hash_type"], "type");
    }

    #[test]
    fn type_search_key_matches_args_prefix() {
        let type_script = Script::new([0x81; 32], HashType::Data1, vec![0xEE; 32]);
        let key = type_search_key(&type_script).expect("serializes");
        assert_eq!(key["script_type"], "type");
        assert_eq!(key["script_search_mode"], "prefix");
        assert_eq!(key["script"]["args"], format!("0x{}", "ee".repeat(32)));
        assert!(key.get("filter").is_none());
    }
}
