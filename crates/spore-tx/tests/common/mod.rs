#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use spore_tx::config::{FeeRatePolicy, ScriptBehaviors, ScriptInfo, ScriptRegistry, SporeConfig};
use spore_tx::data::{ClusterData, SporeData};
use spore_tx::error::SporeError;
use spore_tx::provider::{CellProvider, CellStatus, FeeRateProvider};
use spore_tx::types::{Byte32, Cell, CellDep, DepType, HashType, ONE_CKB, OutPoint, Script};

/// In-memory ledger: live typed cells, plain wallet cells and a fee rate.
pub struct MockChain {
    live: HashMap<OutPoint, Cell>,
    dead: HashSet<OutPoint>,
    wallet: Vec<Cell>,
    next_tx: u64,
    pub min_fee_rate: u64,
    pub collect_calls: RefCell<usize>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            live: HashMap::new(),
            dead: HashSet::new(),
            wallet: Vec::new(),
            next_tx: 1,
            min_fee_rate: 1000,
            collect_calls: RefCell::new(0),
        }
    }

    fn next_out_point(&mut self) -> OutPoint {
        let mut tx_hash = [0xA5; 32];
        tx_hash[..8].copy_from_slice(&self.next_tx.to_le_bytes());
        self.next_tx += 1;
        OutPoint::new(tx_hash, 0)
    }

    pub fn add_live(&mut self, cell: Cell) -> OutPoint {
        let out_point = self.next_out_point();
        self.live.insert(out_point, cell);
        out_point
    }

    /// Plain cell spendable through `collect_cells`.
    pub fn fund(&mut self, lock: &Script, capacity: u64) -> OutPoint {
        let out_point = self.next_out_point();
        self.wallet
            .push(Cell::new(capacity, lock.clone(), None, Vec::new()).with_out_point(out_point));
        out_point
    }

    pub fn spend(&mut self, out_point: &OutPoint) {
        self.live.remove(out_point);
        self.dead.insert(*out_point);
    }

    pub fn unknown_out_point(&mut self) -> OutPoint {
        self.next_out_point()
    }
}

impl CellProvider for MockChain {
    fn get_live_cell(&self, out_point: &OutPoint) -> Result<CellStatus, SporeError> {
        if self.dead.contains(out_point) {
            return Ok(CellStatus::Dead);
        }
        Ok(self
            .live
            .get(out_point)
            .cloned()
            .map_or(CellStatus::Unknown, CellStatus::Live))
    }

    fn collect_cells(&self, lock: &Script, _minimum_capacity: u64) -> Result<Vec<Cell>, SporeError> {
        *self.collect_calls.borrow_mut() += 1;
        Ok(self
            .wallet
            .iter()
            .filter(|cell| &cell.lock == lock)
            .cloned()
            .collect())
    }

    fn find_cells_by_type(&self, type_script: &Script) -> Result<Vec<Cell>, SporeError> {
        Ok(self
            .live
            .iter()
            .filter(|(_, cell)| {
                cell.type_script.as_ref().is_some_and(|script| {
                    script.same_code(type_script) && script.args.starts_with(&type_script.args)
                })
            })
            .map(|(out_point, cell)| cell.clone().with_out_point(*out_point))
            .collect())
    }
}

impl FeeRateProvider for MockChain {
    fn min_fee_rate(&self) -> Result<u64, SporeError> {
        Ok(self.min_fee_rate)
    }
}

pub fn lock(tag: u8) -> Script {
    Script::new([tag; 32], HashType::Type, vec![tag; 20])
}

pub fn script_info(tag: u8, cobuild: bool) -> ScriptInfo {
    ScriptInfo {
        tags: vec!["latest".to_string()],
        code_hash: [tag; 32],
        hash_type: HashType::Data1,
        cell_dep: CellDep::new(OutPoint::new([tag; 32], 0), DepType::Code),
        behaviors: ScriptBehaviors { cobuild },
        script_info_hash: [!tag; 32],
    }
}

pub fn config_with_cobuild(cobuild: bool) -> SporeConfig {
    SporeConfig {
        fee_rate: FeeRatePolicy::Fixed(1000),
        scripts: ScriptRegistry {
            spore: vec![script_info(0x51, cobuild)],
            cluster: vec![script_info(0x61, cobuild)],
            cluster_agent: vec![script_info(0x71, cobuild)],
            mutant: vec![script_info(0x81, false)],
        },
        ..SporeConfig::default()
    }
}

pub fn config() -> SporeConfig {
    config_with_cobuild(true)
}

pub fn text_spore(content_len: usize) -> SporeData {
    SporeData::new("text/plain", vec![b'x'; content_len])
}

pub fn spore_cell(config: &SporeConfig, owner: &Script, data: &SporeData, id: Byte32, capacity: u64) -> Cell {
    let script = config.scripts.spore[0].script(id.to_vec());
    Cell::new(capacity, owner.clone(), Some(script), data.pack().expect("packs"))
}

pub fn cluster_cell(config: &SporeConfig, owner: &Script, data: &ClusterData, id: Byte32, capacity: u64) -> Cell {
    let script = config.scripts.cluster[0].script(id.to_vec());
    Cell::new(capacity, owner.clone(), Some(script), data.pack().expect("packs"))
}

/// Live mutant cell owned by `owner`; a minimum payment is appended to the id.
pub fn mutant_cell(config: &SporeConfig, owner: &Script, id: Byte32, min_payment: Option<u64>) -> Cell {
    let mut args = id.to_vec();
    if let Some(min_payment) = min_payment {
        args.extend(min_payment.to_le_bytes());
    }
    let script = config.scripts.mutant[0].script(args);
    Cell::new(200 * ONE_CKB, owner.clone(), Some(script), vec![0xC0; 64])
}
