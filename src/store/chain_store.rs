//! Durable ledger state. Blocks are applied and undone as single atomic
//! batches; nothing is written unless every check on the block passes.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::dividends::{self, DividendSplit};
use super::kv::{KvStore, WriteBatch};
use super::schema::{self, BLOCK_META};
use crate::asset::{Asset, AssetType};
use crate::blockchain::block::block_id;
use crate::blockchain::{
    BLOCK_VERSION, Block, BlockHeader, BlockState, ForkTracker, FullBlock, Proof, TimeKeeper,
    TimeRecord, block_reward,
};
use crate::config::ChainConfig;
use crate::error::{ChainError, ChainResult};
use crate::hash::{BlockId, TrxId, merkle_root};
use crate::transaction::{
    Claim, INVALID_BLOCK_NUM, Input, MetaTrx, MetaTrxInput, Output, OutputRef, SignedTransaction, SpentRef,
    Transaction, TrxEvaluation, TrxNum, ValidationContext, validate_transaction,
};
use crate::wallet::Address;

const UNITS: usize = AssetType::COUNT;

/// Room kept free for the header and coinbase when filling a block.
const BLOCK_OVERHEAD_RESERVE: usize = 512;

/// Header and proof as stored; transactions live in their own table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BlockRecord {
    header: BlockHeader,
    proof: Proof,
}

/// Per-block bookkeeping needed to score forks and to undo the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub difficulty: u64,
    pub total_difficulty: u128,
    pub state: BlockState,
    pub split: DividendSplit,
    /// Dividend slot values this block overwrote, per asset.
    prev_dividends: Vec<Option<u128>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHead {
    pub id: BlockId,
    pub block_num: u32,
    pub timestamp: i64,
    pub total_difficulty: u128,
    pub state: BlockState,
}

/// Transactions accepted but not yet written, keyed by trx id. Holds both
/// new transactions and copies of stored ones whose outputs were spent.
#[derive(Debug, Default)]
struct PendingState {
    metas: HashMap<TrxId, MetaTrx>,
    created: Vec<TrxId>,
}

/// Everything `push_block` writes, computed before anything is written.
struct BlockPlan {
    id: BlockId,
    meta: BlockMeta,
    pending: PendingState,
    trx_ids: Vec<TrxId>,
}

pub struct ChainStore<S: KvStore> {
    db: S,
    cfg: ChainConfig,
    time_keeper: TimeKeeper,
    head: Option<ChainHead>,
}

impl<S: KvStore> ChainStore<S> {
    /// Open the ledger kept in `db`, creating an empty one if needed.
    pub fn open(mut db: S, cfg: ChainConfig) -> ChainResult<Self> {
        let key = schema::meta_key(schema::SCHEMA_KEY);
        match db.get(&key)? {
            Some(v) => {
                let version: u8 = schema::decode(&v)?;
                if version != schema::SCHEMA_VERSION {
                    return Err(ChainError::storage(format!("store has schema {version}")));
                }
            }
            None => db.put(&key, &schema::encode(&schema::SCHEMA_VERSION)?)?,
        }

        let mut store = Self {
            db,
            time_keeper: TimeKeeper::new(
                cfg.block_interval_secs,
                cfg.time_keeper_window,
                cfg.initial_difficulty,
                None,
            ),
            cfg,
            head: None,
        };
        store.head = store.load_head()?;
        if let Some(head) = &store.head {
            let genesis = store.block_record(0)?;
            store.time_keeper.set_origin(Some(genesis.header.timestamp));
            let first = (head.block_num + 1).saturating_sub(store.cfg.time_keeper_window as u32);
            for n in first..=head.block_num {
                let record = store.time_record(n)?;
                store.time_keeper.push(record)?;
            }
            info!(
                "opened chain at block {} ({}), supply {}",
                head.block_num,
                head.id,
                Asset::new(head.state.supply, AssetType::NATIVE)
            );
        }
        Ok(store)
    }

    pub fn config(&self) -> &ChainConfig {
        &self.cfg
    }

    pub fn db(&self) -> &S {
        &self.db
    }

    pub fn time_keeper(&self) -> &TimeKeeper {
        &self.time_keeper
    }

    pub fn head(&self) -> Option<&ChainHead> {
        self.head.as_ref()
    }

    /// `INVALID_BLOCK_NUM` while the chain is empty.
    pub fn head_block_num(&self) -> u32 {
        self.head
            .as_ref()
            .map(|h| h.block_num)
            .unwrap_or(INVALID_BLOCK_NUM)
    }

    pub fn head_block_id(&self) -> BlockId {
        self.head.as_ref().map(|h| h.id).unwrap_or_default()
    }

    pub fn head_state(&self) -> BlockState {
        self.head.as_ref().map(|h| h.state.clone()).unwrap_or_default()
    }

    pub fn next_block_num(&self) -> u32 {
        self.head.as_ref().map(|h| h.block_num + 1).unwrap_or(0)
    }

    pub fn current_difficulty(&self) -> u64 {
        self.time_keeper.current_difficulty()
    }

    pub fn next_difficulty(&self) -> u64 {
        self.time_keeper.next_difficulty()
    }

    // ---- reads -------------------------------------------------------------

    fn get<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> ChainResult<Option<T>> {
        self.db.get(key)?.map(|v| schema::decode(&v)).transpose()
    }

    fn load_head(&self) -> ChainResult<Option<ChainHead>> {
        let Some((key, value)) = self.db.last(&[BLOCK_META])? else {
            return Ok(None);
        };
        let block_num = schema::block_num_of(&key)?;
        let meta: BlockMeta = schema::decode(&value)?;
        let record = self.block_record(block_num)?;
        Ok(Some(ChainHead {
            id: block_id(&record.header, &record.proof),
            block_num,
            timestamp: record.header.timestamp,
            total_difficulty: meta.total_difficulty,
            state: meta.state,
        }))
    }

    fn block_record(&self, block_num: u32) -> ChainResult<BlockRecord> {
        self.get(&schema::block_key(block_num))?
            .ok_or_else(|| ChainError::storage(format!("block {block_num} missing")))
    }

    pub fn block_meta(&self, block_num: u32) -> ChainResult<Option<BlockMeta>> {
        self.get(&schema::block_meta_key(block_num))
    }

    fn time_record(&self, block_num: u32) -> ChainResult<TimeRecord> {
        let record = self.block_record(block_num)?;
        let meta = self
            .block_meta(block_num)?
            .ok_or_else(|| ChainError::storage(format!("block meta {block_num} missing")))?;
        Ok(TimeRecord {
            block_num,
            time: record.header.timestamp,
            difficulty: meta.difficulty,
        })
    }

    fn trx_location(&self, id: &TrxId) -> ChainResult<Option<TrxNum>> {
        self.get(&schema::trx_id_key(id))
    }

    pub fn fetch_trx(&self, id: &TrxId) -> ChainResult<Option<MetaTrx>> {
        match self.trx_location(id)? {
            Some(num) => self.get(&schema::meta_trx_key(num)),
            None => Ok(None),
        }
    }

    pub fn fetch_block_num(&self, id: &BlockId) -> ChainResult<Option<u32>> {
        self.get(&schema::block_id_key(id))
    }

    pub fn fetch_block(&self, block_num: u32) -> ChainResult<Option<Block>> {
        let Some(record) = self.get::<BlockRecord>(&schema::block_key(block_num))? else {
            return Ok(None);
        };
        let ids: Vec<TrxId> = self
            .get(&schema::block_trxs_key(block_num))?
            .unwrap_or_default();
        let mut trxs = Vec::with_capacity(ids.len());
        for idx in 0..ids.len() {
            let loc = TrxNum::new(block_num, idx as u16);
            let meta: MetaTrx = self
                .get(&schema::meta_trx_key(loc))?
                .ok_or_else(|| ChainError::storage(format!("trx {loc:?} missing")))?;
            trxs.push(meta.trx);
        }
        Ok(Some(Block {
            header: record.header,
            proof: record.proof,
            trxs,
        }))
    }

    pub fn fetch_full_block(&self, block_num: u32) -> ChainResult<Option<FullBlock>> {
        Ok(self.fetch_block(block_num)?.map(FullBlock::from))
    }

    /// Resolve inputs against the committed chain.
    pub fn fetch_inputs(&self, inputs: &[Input]) -> ChainResult<Vec<MetaTrxInput>> {
        self.resolve_inputs(&PendingState::default(), inputs)
    }

    fn lookup(&self, pending: &PendingState, id: &TrxId) -> ChainResult<Option<MetaTrx>> {
        match pending.metas.get(id) {
            Some(meta) => Ok(Some(meta.clone())),
            None => self.fetch_trx(id),
        }
    }

    fn resolve_inputs(&self, pending: &PendingState, inputs: &[Input]) -> ChainResult<Vec<MetaTrxInput>> {
        let mut resolved = Vec::with_capacity(inputs.len());
        for input in inputs {
            let r = input.output_ref;
            let unresolved = || ChainError::UnresolvedInput {
                trx_id: r.trx_id.to_string(),
                output_idx: r.output_idx,
            };
            let meta = self.lookup(pending, &r.trx_id)?.ok_or_else(unresolved)?;
            let (output, status) = meta.output(r.output_idx).ok_or_else(unresolved)?;
            let dividends = self.calculate_output_dividends(output, meta.location.block_num)?;
            resolved.push(MetaTrxInput {
                output_ref: r,
                source: meta.location,
                source_is_coinbase: meta.trx.trx.is_coinbase(),
                output: output.clone(),
                meta: *status,
                dividends,
            });
        }
        Ok(resolved)
    }

    /// Unspent outputs paying `owner` by plain signature, with what each
    /// has earned in dividends.
    pub fn unspent_outputs(&self, owner: &Address) -> ChainResult<Vec<(OutputRef, Output, Asset)>> {
        let mut found = Vec::new();
        let start = [schema::META_TRXS];
        let end = [schema::META_TRXS + 1];
        for (_, value) in self.db.range(&start, &end)? {
            let meta: MetaTrx = schema::decode(&value)?;
            let id = meta.trx.id();
            for (idx, (out, status)) in meta.trx.trx.outputs.iter().zip(&meta.meta_outputs).enumerate() {
                if status.is_spent() || out.claim != (Claim::Signature { owner: *owner }) {
                    continue;
                }
                let dividends = self.calculate_output_dividends(out, meta.location.block_num)?;
                found.push((OutputRef::new(id, idx as u16), out.clone(), dividends));
            }
        }
        Ok(found)
    }

    /// Spendable value of `owner` per asset, dividends included.
    pub fn balance_of(&self, owner: &Address) -> ChainResult<Vec<Asset>> {
        let mut totals = [0u128; UNITS];
        for (_, out, dividends) in self.unspent_outputs(owner)? {
            for a in [out.amount, dividends] {
                let slot = &mut totals[a.unit.index()];
                *slot = slot
                    .checked_add(a.amount)
                    .ok_or_else(|| ChainError::malformed("balance overflow"))?;
            }
        }
        Ok(AssetType::ALL
            .iter()
            .filter(|u| totals[u.index()] > 0)
            .map(|u| Asset::new(totals[u.index()], *u))
            .collect())
    }

    // ---- dividends ---------------------------------------------------------

    fn accumulator(&self, unit: AssetType, block_num: u32) -> ChainResult<u128> {
        let slot = dividends::slot(block_num, self.cfg.blocks_per_year);
        Ok(self.get(&schema::dividend_key(unit, slot))?.unwrap_or(0))
    }

    /// Dividend per unit of `unit` earned by balances created in block
    /// `from`, as of head block `head`.
    pub fn calculate_dividends(&self, unit: AssetType, from: u32, head: u32) -> ChainResult<u128> {
        match dividends::payout_window(from, head, self.cfg.blocks_per_year, self.cfg.dividend_exclusion) {
            Some((from, to)) => Ok(self
                .accumulator(unit, to)?
                .wrapping_sub(self.accumulator(unit, from)?)),
            None => Ok(0),
        }
    }

    /// Dividends owed to `output`, created in block `from`, at the current head.
    pub fn calculate_output_dividends(&self, output: &Output, from: u32) -> ChainResult<Asset> {
        let unit = output.amount.unit;
        let Some(head) = self.head.as_ref().map(|h| h.block_num) else {
            return Ok(Asset::zero(unit));
        };
        if from == INVALID_BLOCK_NUM {
            return Ok(Asset::zero(unit));
        }
        let window = dividends::payout_window(from, head, self.cfg.blocks_per_year, self.cfg.dividend_exclusion);
        let Some((from, to)) = window else {
            return Ok(Asset::zero(unit));
        };
        let amount = dividends::owed(
            output.amount.amount,
            self.accumulator(unit, from)?,
            self.accumulator(unit, to)?,
        )?;
        Ok(Asset::new(amount, unit))
    }

    /// Split of `fees` plus the subsidy of `block_num` against the current supply.
    pub fn calculate_dividend_fees(&self, fees: u128, block_num: u32) -> ChainResult<DividendSplit> {
        let reward = block_reward(block_num, self.cfg.blocks_per_year);
        DividendSplit::new(fees, reward, self.head_state().supply)
    }

    // ---- evaluation --------------------------------------------------------

    fn context(&self, block_num: u32, time: i64) -> ValidationContext {
        ValidationContext {
            ref_block_num: block_num,
            ref_time: time,
            enforce_unspent: true,
            coinbase_wait: self.cfg.coinbase_wait,
        }
    }

    /// Validate a loose transaction as if it were in the next block. Read-only.
    pub fn evaluate_transaction(&self, trx: &SignedTransaction) -> ChainResult<TrxEvaluation> {
        let id = trx.id();
        if trx.trx.is_coinbase() {
            return Err(ChainError::malformed("coinbase transactions only come with a block"));
        }
        if self.trx_location(&id)?.is_some() {
            return Err(ChainError::malformed(format!("transaction {id} already included")));
        }
        let inputs = self.fetch_inputs(&trx.trx.inputs)?;
        let ctx = self.context(self.next_block_num(), self.time_keeper.next_time());
        let eval = validate_transaction(trx, &inputs, &ctx)?;
        debug!("evaluated {}: fees {}", id, eval.fees);
        Ok(eval)
    }

    /// Validate `trx` on top of the chain plus `pending`, then record it there.
    fn apply_to_pending(
        &self,
        pending: &mut PendingState,
        trx: &SignedTransaction,
        location: TrxNum,
        ctx: &ValidationContext,
    ) -> ChainResult<TrxEvaluation> {
        let id = trx.id();
        if pending.created.contains(&id) || self.trx_location(&id)?.is_some() {
            return Err(ChainError::malformed(format!("duplicate transaction {id}")));
        }
        let inputs = self.resolve_inputs(pending, &trx.trx.inputs)?;
        let eval = validate_transaction(trx, &inputs, ctx)?;

        for (input_idx, input) in inputs.iter().enumerate() {
            let source = input.output_ref.trx_id;
            let mut meta = match pending.metas.remove(&source) {
                Some(meta) => meta,
                None => self.fetch_trx(&source)?.ok_or_else(|| ChainError::UnresolvedInput {
                    trx_id: source.to_string(),
                    output_idx: input.output_ref.output_idx,
                })?,
            };
            if let Some(status) = meta.meta_outputs.get_mut(usize::from(input.output_ref.output_idx)) {
                status.spent_by = Some(SpentRef {
                    trx: location,
                    input_idx: input_idx as u16,
                });
            }
            pending.metas.insert(source, meta);
        }
        pending.metas.insert(id, MetaTrx::new(trx.clone(), location));
        pending.created.push(id);
        Ok(eval)
    }

    /// Ledger totals after applying a block with these evaluations.
    fn next_state(&self, evals: &[TrxEvaluation], split: &DividendSplit, features: u64) -> ChainResult<BlockState> {
        let mut state = self.head_state();
        state.supply = split.next_supply(state.supply)?;
        state.features = features;
        let out_of_range = || ChainError::malformed("issuance out of range");
        for eval in evals {
            for u in 0..UNITS {
                state.issuance[u] = state.issuance[u]
                    .checked_add(eval.issued[u])
                    .and_then(|v| v.checked_sub(eval.retired[u]))
                    .ok_or_else(out_of_range)?;
                state.backing[u] = state.backing[u]
                    .checked_add(eval.collateral_locked[u])
                    .and_then(|v| v.checked_sub(eval.collateral_released[u]))
                    .ok_or_else(out_of_range)?;
            }
        }
        Ok(state)
    }

    // ---- push / pop --------------------------------------------------------

    fn plan_block(&self, block: &Block) -> ChainResult<BlockPlan> {
        let header = &block.header;
        let n = self.next_block_num();

        let size = block.size_bytes();
        if size > self.cfg.max_block_size {
            return Err(ChainError::malformed(format!(
                "block is {size} bytes, limit {}",
                self.cfg.max_block_size
            )));
        }
        if header.version != BLOCK_VERSION {
            return Err(ChainError::malformed(format!("unknown block version {}", header.version)));
        }
        if header.block_num != n || header.prev != self.head_block_id() {
            return Err(ChainError::linkage(format!(
                "block {} on {} does not extend head {} ({})",
                header.block_num,
                header.prev,
                n.wrapping_sub(1),
                self.head_block_id()
            )));
        }
        if let Some(median) = self.time_keeper.median_time() {
            if header.timestamp < median {
                return Err(ChainError::StaleOrFutureTimestamp(format!(
                    "block time {} is before median {median}",
                    header.timestamp
                )));
            }
        }
        let latest = Utc::now()
            .timestamp()
            .max(self.time_keeper.next_time())
            .saturating_add(self.cfg.max_future_secs);
        if header.timestamp > latest {
            return Err(ChainError::StaleOrFutureTimestamp(format!(
                "block time {} is after {latest}",
                header.timestamp
            )));
        }

        let difficulty = block.difficulty(self.cfg.pow_scratch_bytes);
        let required = self.next_difficulty();
        if self.cfg.enforce_pow && difficulty < required {
            return Err(ChainError::ForkDifficultyInsufficient {
                required,
                actual: difficulty,
            });
        }

        let trx_ids = block.trx_ids();
        if merkle_root(&trx_ids) != header.trx_mroot {
            return Err(ChainError::linkage("transaction merkle root mismatch"));
        }
        if block.trxs.iter().skip(1).any(|t| t.trx.is_coinbase()) {
            return Err(ChainError::malformed("coinbase must be the first and only one"));
        }
        let mut seen = HashSet::new();
        for input in block.trxs.iter().flat_map(|t| &t.trx.inputs) {
            if !seen.insert(input.output_ref) {
                return Err(ChainError::malformed(format!(
                    "output {}:{} spent twice in block",
                    input.output_ref.trx_id, input.output_ref.output_idx
                )));
            }
        }

        let ctx = self.context(n, header.timestamp);
        let mut pending = PendingState::default();
        let mut evals = Vec::with_capacity(block.trxs.len());
        let mut fees = 0u128;
        let mut minted = 0u128;
        for (idx, trx) in block.trxs.iter().enumerate() {
            let trx_idx = u16::try_from(idx).map_err(|_| ChainError::malformed("too many transactions"))?;
            let eval = self.apply_to_pending(&mut pending, trx, TrxNum::new(n, trx_idx), &ctx)?;
            fees = fees
                .checked_add(eval.fees.amount)
                .ok_or_else(|| ChainError::malformed("fee overflow"))?;
            minted = minted
                .checked_add(eval.minted.amount)
                .ok_or_else(|| ChainError::malformed("minted overflow"))?;
            evals.push(eval);
        }

        let split = self.calculate_dividend_fees(fees, n)?;
        if minted != split.miner {
            return Err(ChainError::Unbalanced {
                unit: AssetType::NATIVE.to_string(),
                inputs: split.miner,
                outputs: minted,
            });
        }
        if header.dividend_percent != split.percent {
            return Err(ChainError::malformed(format!(
                "dividend percent {} should be {}",
                header.dividend_percent, split.percent
            )));
        }
        let state = self.next_state(&evals, &split, header.features)?;
        if state.digest() != header.state_hash {
            return Err(ChainError::linkage("state hash mismatch"));
        }

        let total_difficulty = self.head.as_ref().map(|h| h.total_difficulty).unwrap_or(0) + u128::from(difficulty);
        Ok(BlockPlan {
            id: block.id(),
            meta: BlockMeta {
                difficulty,
                total_difficulty,
                state,
                split,
                prev_dividends: Vec::new(),
            },
            pending,
            trx_ids,
        })
    }

    /// Validate `block` against the head and apply it atomically.
    pub fn push_block(&mut self, block: Block) -> ChainResult<BlockId> {
        let mut plan = match self.plan_block(&block) {
            Ok(plan) => plan,
            Err(e) => {
                warn!("rejected block {}: {}", block.header.block_num, e);
                return Err(e);
            }
        };
        let n = block.header.block_num;

        let mut batch = WriteBatch::default();
        for (id, meta) in &plan.pending.metas {
            batch.put(schema::meta_trx_key(meta.location), schema::encode(meta)?);
            if plan.pending.created.contains(id) {
                batch.put(schema::trx_id_key(id), schema::encode(&meta.location)?);
            }
        }
        let record = BlockRecord {
            header: block.header.clone(),
            proof: block.proof.clone(),
        };
        batch.put(schema::block_key(n), schema::encode(&record)?);
        batch.put(schema::block_trxs_key(n), schema::encode(&plan.trx_ids)?);
        batch.put(schema::block_id_key(&plan.id), schema::encode(&n)?);

        let slot = dividends::slot(n, self.cfg.blocks_per_year);
        for unit in AssetType::ALL {
            let key = schema::dividend_key(unit, slot);
            plan.meta.prev_dividends.push(self.get(&key)?);
            let prev = if n == 0 { 0 } else { self.accumulator(unit, n - 1)? };
            let earned = if unit == AssetType::NATIVE { plan.meta.split.percent } else { 0 };
            batch.put(key, schema::encode(&prev.wrapping_add(earned))?);
        }
        batch.put(schema::block_meta_key(n), schema::encode(&plan.meta)?);

        self.db.apply(batch)?;

        if n == 0 {
            self.time_keeper.set_origin(Some(block.header.timestamp));
        }
        self.time_keeper.push(TimeRecord {
            block_num: n,
            time: block.header.timestamp,
            difficulty: plan.meta.difficulty,
        })?;
        info!(
            "📦 block {} accepted ({}), {} trxs, fees {}, difficulty {}",
            n,
            plan.id,
            block.trxs.len(),
            Asset::new(plan.meta.split.fees, AssetType::NATIVE),
            plan.meta.difficulty
        );
        self.head = Some(ChainHead {
            id: plan.id,
            block_num: n,
            timestamp: block.header.timestamp,
            total_difficulty: plan.meta.total_difficulty,
            state: plan.meta.state,
        });
        Ok(plan.id)
    }

    /// Undo the head block exactly and return it.
    pub fn pop_block(&mut self) -> ChainResult<Block> {
        let head = self
            .head
            .clone()
            .ok_or_else(|| ChainError::linkage("cannot pop an empty chain"))?;
        let n = head.block_num;
        let block = self
            .fetch_block(n)?
            .ok_or_else(|| ChainError::storage(format!("head block {n} missing")))?;
        let meta = self
            .block_meta(n)?
            .ok_or_else(|| ChainError::storage(format!("block meta {n} missing")))?;

        let mut batch = WriteBatch::default();
        let mut restored: HashMap<TrxId, MetaTrx> = HashMap::new();
        let in_block: HashSet<TrxId> = block.trx_ids().into_iter().collect();
        for trx in block.trxs.iter().rev() {
            for input in &trx.trx.inputs {
                let source = input.output_ref.trx_id;
                if in_block.contains(&source) {
                    continue;
                }
                let mut source_meta = match restored.remove(&source) {
                    Some(m) => m,
                    None => self
                        .fetch_trx(&source)?
                        .ok_or_else(|| ChainError::storage(format!("spent trx {source} missing")))?,
                };
                if let Some(status) = source_meta
                    .meta_outputs
                    .get_mut(usize::from(input.output_ref.output_idx))
                {
                    status.spent_by = None;
                }
                restored.insert(source, source_meta);
            }
        }
        for meta in restored.values() {
            batch.put(schema::meta_trx_key(meta.location), schema::encode(meta)?);
        }
        for (idx, id) in block.trx_ids().iter().enumerate() {
            batch.delete(schema::trx_id_key(id));
            batch.delete(schema::meta_trx_key(TrxNum::new(n, idx as u16)));
        }
        batch.delete(schema::block_key(n));
        batch.delete(schema::block_trxs_key(n));
        batch.delete(schema::block_id_key(&head.id));
        batch.delete(schema::block_meta_key(n));

        let slot = dividends::slot(n, self.cfg.blocks_per_year);
        for (unit, prev) in AssetType::ALL.iter().zip(&meta.prev_dividends) {
            let key = schema::dividend_key(*unit, slot);
            match prev {
                Some(v) => batch.put(key, schema::encode(v)?),
                None => batch.delete(key),
            }
        }

        // the record the matching push evicted, read before the batch drops it
        let window = self.cfg.time_keeper_window as u32;
        let refill = match n.checked_sub(window) {
            Some(old) => Some(self.time_record(old)?),
            None => None,
        };

        self.db.apply(batch)?;

        self.time_keeper.pop(n)?;
        if let Some(record) = refill {
            self.time_keeper.push_front(record)?;
        }
        if n == 0 {
            self.time_keeper.set_origin(None);
        }
        self.head = self.load_head()?;
        info!("↩️ block {} popped ({})", n, head.id);
        Ok(block)
    }

    // ---- block production --------------------------------------------------

    /// Unsealed block on top of the head paying `miner`, filled with the
    /// best-paying valid candidates.
    pub fn generate_next_block(&self, miner: Address, candidates: &[SignedTransaction]) -> ChainResult<Block> {
        let floor = self.time_keeper.median_time().unwrap_or(i64::MIN);
        self.generate_next_block_at(miner, candidates, Utc::now().timestamp().max(floor))
    }

    pub fn generate_next_block_at(
        &self,
        miner: Address,
        candidates: &[SignedTransaction],
        timestamp: i64,
    ) -> ChainResult<Block> {
        let n = self.next_block_num();
        let ctx = self.context(n, timestamp);

        let mut ranked: Vec<(u128, TrxId, &SignedTransaction)> = Vec::new();
        for trx in candidates.iter().filter(|t| !t.trx.is_coinbase()) {
            let inputs = match self.fetch_inputs(&trx.trx.inputs) {
                Ok(inputs) => inputs,
                Err(e) => {
                    debug!("skipping {}: {}", trx.id(), e);
                    continue;
                }
            };
            match validate_transaction(trx, &inputs, &ctx) {
                Ok(eval) => ranked.push((eval.fees.amount, eval.trx_id, trx)),
                Err(e) => debug!("skipping {}: {}", trx.id(), e),
            }
        }
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let budget = self.cfg.max_block_size.saturating_sub(BLOCK_OVERHEAD_RESERVE);
        let mut used = 0usize;
        let mut pending = PendingState::default();
        let mut chosen: Vec<SignedTransaction> = Vec::new();
        let mut evals = Vec::new();
        let mut fees = 0u128;
        for (_, id, trx) in ranked {
            let size = trx.size_bytes();
            if used + size > budget {
                continue;
            }
            let loc = TrxNum::new(n, (chosen.len() + 1) as u16);
            match self.apply_to_pending(&mut pending, trx, loc, &ctx) {
                Ok(eval) => {
                    used += size;
                    fees = fees.saturating_add(eval.fees.amount);
                    evals.push(eval);
                    chosen.push(trx.clone());
                }
                Err(e) => debug!("dropping {} from block {}: {}", id, n, e),
            }
        }

        let split = self.calculate_dividend_fees(fees, n)?;
        let mut trxs = Vec::with_capacity(chosen.len() + 1);
        if split.miner > 0 {
            let payout = Output::to(miner, Asset::new(split.miner, AssetType::NATIVE));
            trxs.push(SignedTransaction::unsigned(Transaction::coinbase(n, vec![payout])));
        }
        trxs.extend(chosen);

        let state = self.next_state(&evals, &split, self.cfg.features)?;
        let header = BlockHeader {
            version: BLOCK_VERSION,
            prev: self.head_block_id(),
            block_num: n,
            timestamp,
            state_hash: state.digest(),
            trx_mroot: merkle_root(&trxs.iter().map(SignedTransaction::id).collect::<Vec<_>>()),
            dividend_percent: split.percent,
            features: self.cfg.features,
        };
        debug!(
            "generated block {} with {} trxs, fees {}",
            n,
            trxs.len(),
            Asset::new(fees, AssetType::NATIVE)
        );
        Ok(Block {
            header,
            proof: Proof::default(),
            trxs,
        })
    }

    // ---- forks -------------------------------------------------------------

    /// Make `head_id` (a block known to `forks`) the chain head. On failure
    /// the offending block is marked invalid and the previous chain is restored.
    pub fn switch_to_fork(&mut self, forks: &mut ForkTracker, head_id: BlockId) -> ChainResult<()> {
        if head_id == self.head_block_id() && self.head.is_some() {
            return Ok(());
        }
        let path = forks.fork_path(&head_id);
        let mut fork_start = None;
        for (i, id) in path.iter().enumerate() {
            if self.fetch_block_num(id)?.is_none() {
                fork_start = Some(i);
                break;
            }
        }
        let Some(start) = fork_start else {
            return Err(ChainError::linkage(format!("{head_id} is already on the chain")));
        };
        let mut fork_blocks = Vec::with_capacity(path.len() - start);
        for id in &path[start..] {
            let block = forks
                .fetch_block(id)
                .cloned()
                .ok_or_else(|| ChainError::linkage(format!("block {id} not available")))?;
            fork_blocks.push(block);
        }
        let ancestor = fork_blocks[0].header.prev;
        let ancestor_num = if ancestor.is_zero() && fork_blocks[0].header.block_num == 0 {
            None
        } else {
            Some(
                self.fetch_block_num(&ancestor)?
                    .ok_or_else(|| ChainError::linkage(format!("fork base {ancestor} not on the chain")))?,
            )
        };

        info!(
            "switching to fork {} from block {:?}",
            head_id,
            ancestor_num.map(|a| a + 1).unwrap_or(0)
        );
        let mut popped = Vec::new();
        while self.head.is_some() && Some(self.head_block_num()) != ancestor_num {
            popped.push(self.pop_block()?);
        }

        let mut applied = 0usize;
        for block in &fork_blocks {
            let id = block.id();
            match self.push_block(block.clone()) {
                Ok(_) => {
                    forks.set_valid(&id, true);
                    applied += 1;
                }
                Err(e) => {
                    forks.set_valid(&id, false);
                    for _ in 0..applied {
                        self.pop_block()?;
                    }
                    for old in popped.into_iter().rev() {
                        self.push_block(old)?;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
