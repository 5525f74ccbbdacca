use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use actix_web::HttpResponse;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::blockchain::{Block, ForkTracker, MinerConfig};
use crate::config::AppConfig;
use crate::error::{ChainError, ChainResult};
use crate::store::{ChainStore, SledStore};
use crate::transaction::SignedTransaction;

/// An unsealed block handed to an external miner.
#[derive(Clone)]
pub struct MiningTemplate {
    pub template_id: String,
    pub block: Block,
    pub target: u64,
}

/// Shared application state: the committed chain, competing forks, mempool
/// and outstanding mining templates.
pub struct AppState {
    pub chain: RwLock<ChainStore<SledStore>>,
    pub forks: RwLock<ForkTracker>,
    pub mempool: Mutex<Vec<SignedTransaction>>,
    pub mining_templates: Mutex<HashMap<String, MiningTemplate>>,
    /// Cancel flags of in-process mining jobs.
    pub mining_jobs: Mutex<Vec<Arc<AtomicBool>>>,
    pub miner: MinerConfig,
}

impl AppState {
    pub fn open(cfg: &AppConfig) -> ChainResult<Self> {
        let db = SledStore::open(&cfg.data_dir)?;
        let chain = ChainStore::open(db, cfg.chain.clone())?;
        let mut forks = ForkTracker::new(1);
        if let Some(head) = chain.head() {
            let horizon = u32::try_from(cfg.chain.time_keeper_window).unwrap_or(u32::MAX);
            for block_num in head.block_num.saturating_sub(horizon)..=head.block_num {
                anchor_committed(&chain, &mut forks, block_num)?;
            }
        }
        Ok(Self::new(chain, forks, cfg.miner.clone()))
    }

    pub fn new(chain: ChainStore<SledStore>, forks: ForkTracker, miner: MinerConfig) -> Self {
        Self {
            chain: RwLock::new(chain),
            forks: RwLock::new(forks),
            mempool: Mutex::new(Vec::new()),
            mining_templates: Mutex::new(HashMap::new()),
            mining_jobs: Mutex::new(Vec::new()),
            miner,
        }
    }

    /// Register a mining job. Its flag is raised by the next head change.
    pub fn start_mining(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(false));
        let mut jobs = self.mining_jobs.lock();
        jobs.retain(|f| Arc::strong_count(f) > 1);
        jobs.push(flag.clone());
        flag
    }

    pub fn cancel_mining(&self) {
        for flag in self.mining_jobs.lock().drain(..) {
            flag.store(true, Ordering::Relaxed);
        }
    }
}

/// Register committed block `block_num` as a fork root.
pub fn anchor_committed(
    chain: &ChainStore<SledStore>,
    forks: &mut ForkTracker,
    block_num: u32,
) -> ChainResult<()> {
    let block = chain
        .fetch_block(block_num)?
        .ok_or_else(|| ChainError::storage(format!("block {block_num} missing")))?;
    let meta = chain
        .block_meta(block_num)?
        .ok_or_else(|| ChainError::storage(format!("block meta {block_num} missing")))?;
    forks.anchor(block.id(), block_num, meta.total_difficulty);
    Ok(())
}

/// Validation failures are the client's fault, storage failures ours.
pub fn error_response(err: &ChainError) -> HttpResponse {
    let body = json!({
        "error": err.to_string(),
        "protocol_violation": err.is_protocol_violation(),
    });
    match err {
        ChainError::StorageFailure(_) => HttpResponse::InternalServerError().json(body),
        _ => HttpResponse::BadRequest().json(body),
    }
}

/* ---------- Mining API Models ---------- */

#[derive(Deserialize)]
pub struct TemplateRequest {
    pub miner_address: String,
}

#[derive(Serialize)]
pub struct TemplateResponse {
    pub template_id: String,
    pub block_num: u32,
    pub previous_id: String,
    pub timestamp: i64,
    pub target: u64,
    /// Hex header digest the merkle branch starts from.
    pub header_digest: String,
    pub block: Block,
}

#[derive(Deserialize)]
pub struct SubmitRequest {
    pub template_id: String,
    pub nonce: u64,
    /// Merkle branch for merged mining; empty for solo mining.
    #[serde(default)]
    pub branch: crate::hash::MerkleBranch,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub accepted: bool,
    pub block_id: String,
    pub difficulty: u64,
    pub head_block_num: u32,
}

#[derive(Deserialize)]
pub struct MineRequest {
    pub miner_address: String,
}

/* ---------- Chain API Models ---------- */

#[derive(Serialize)]
pub struct BlockSummary {
    pub id: String,
    pub block_num: u32,
    pub previous_id: String,
    pub timestamp: i64,
    pub dividend_percent: u128,
    pub trx_ids: Vec<String>,
}

#[derive(Serialize)]
pub struct HeadResponse {
    pub block_num: Option<u32>,
    pub block_id: String,
    pub current_difficulty: u64,
    pub next_difficulty: u64,
}

#[derive(Serialize)]
pub struct UnknownForksResponse {
    pub unknown: Vec<String>,
    pub best_fork_head: Option<String>,
}

/* ---------- TX API Models ---------- */

#[derive(Serialize)]
pub struct NewTxResponse {
    pub trx_id: String,
    pub fees: String,
}

#[derive(Serialize)]
pub struct MempoolResponse {
    pub size: usize,
    pub transactions: Vec<String>, // list trx ids for brevity
}

#[derive(Serialize)]
pub struct TrxResponse {
    pub trx_id: String,
    pub block_num: u32,
    pub trx_idx: u16,
    pub spent: Vec<bool>,
    pub trx: SignedTransaction,
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balances: Vec<String>,
    pub outputs: usize,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub height: Option<u32>,
    pub supply: String,
    pub issuance: Vec<String>,
    pub target_block_time_secs: i64,
    pub time_keeper_window: usize,
    pub median_time: Option<i64>,
    pub next_block_time: i64,
    pub mempool_size: usize,
    pub tracked_forks: usize,
}
