use actix_web::{HttpResponse, Responder, get, post, web};
use log::{info, warn};

use super::models::{
    AppState, BlockSummary, HeadResponse, SubmitResponse, UnknownForksResponse, anchor_committed,
    error_response,
};
use super::tx::refresh_mempool;
use crate::blockchain::Block;
use crate::error::ChainResult;

#[get("/head/")]
pub async fn get_head(state: web::Data<AppState>) -> impl Responder {
    let chain = state.chain.read();
    HttpResponse::Ok().json(HeadResponse {
        block_num: chain.head().map(|h| h.block_num),
        block_id: chain.head_block_id().to_string(),
        current_difficulty: chain.current_difficulty(),
        next_difficulty: chain.next_difficulty(),
    })
}

#[get("/block/{num}/")]
pub async fn get_block(state: web::Data<AppState>, path: web::Path<(u32,)>) -> impl Responder {
    let block_num = path.into_inner().0;
    let full = match state.chain.read().fetch_full_block(block_num) {
        Ok(Some(full)) => full,
        Ok(None) => return HttpResponse::NotFound().body("block not found"),
        Err(e) => return error_response(&e),
    };
    let header = &full.block.header;
    HttpResponse::Ok().json(BlockSummary {
        id: full.id.to_string(),
        block_num: header.block_num,
        previous_id: header.prev.to_string(),
        timestamp: header.timestamp,
        dividend_percent: header.dividend_percent,
        trx_ids: full.trx_ids.iter().map(ToString::to_string).collect(),
    })
}

/// Sealed block from another node; may extend the head or start a fork.
#[post("/block/")]
pub async fn post_block(state: web::Data<AppState>, body: web::Json<Block>) -> impl Responder {
    match accept_block(&state, body.into_inner()) {
        Ok(resp) => HttpResponse::Ok().json(resp),
        Err(e) => error_response(&e),
    }
}

/// Parents referenced by cached blocks that this node has never seen.
#[get("/forks/unknown/")]
pub async fn get_unknown_forks(state: web::Data<AppState>) -> impl Responder {
    let forks = state.forks.read();
    HttpResponse::Ok().json(UnknownForksResponse {
        unknown: forks.fetch_unknown().iter().map(ToString::to_string).collect(),
        best_fork_head: forks.best_fork_head_id().map(|id| id.to_string()),
    })
}

/// Cache `block` with the fork tracker and move the head to the heaviest
/// valid fork. `accepted` reports whether the block ended up on the chain.
pub fn accept_block(state: &AppState, block: Block) -> ChainResult<SubmitResponse> {
    let id = block.id();
    let scratch_bytes = state.chain.read().config().pow_scratch_bytes;
    let difficulty = block.difficulty(scratch_bytes);

    let mut chain = state.chain.write();
    let mut forks = state.forks.write();

    if let Some(head) = chain.head() {
        if forks.node(&head.id).is_none() {
            forks.anchor(head.id, head.block_num, head.total_difficulty);
        }
    }
    let prev = block.header.prev;
    if forks.node(&prev).is_none() {
        if let Some(parent_num) = chain.fetch_block_num(&prev)? {
            let horizon = u32::try_from(chain.config().time_keeper_window).unwrap_or(u32::MAX);
            if parent_num.saturating_add(horizon) >= chain.head_block_num() {
                anchor_committed(&chain, &mut forks, parent_num)?;
            }
        }
    }
    forks.cache_block(block, difficulty)?;

    let before = chain.head().map(|h| h.id);
    if let Some(best) = forks.best_fork_head_id() {
        if Some(best) != before {
            if let Err(e) = chain.switch_to_fork(&mut forks, best) {
                warn!("CHAIN - fork {best} rejected: {e}");
                return Err(e);
            }
        }
    }

    let head = chain.head().map(|h| h.id);
    if head != before {
        state.cancel_mining();
        let head_num = chain.head_block_num();
        let horizon = u32::try_from(chain.config().time_keeper_window).unwrap_or(u32::MAX);
        forks.prune_below(head_num.saturating_sub(horizon));
        let mut mempool = state.mempool.lock();
        refresh_mempool(&*chain, &mut mempool);
        let head_id = chain.head_block_id();
        state
            .mining_templates
            .lock()
            .retain(|_, t| t.block.header.prev == head_id);
        info!("CHAIN - head is now #{head_num} ({head_id})");
    }

    Ok(SubmitResponse {
        accepted: chain.fetch_block_num(&id)?.is_some(),
        block_id: id.to_string(),
        difficulty,
        head_block_num: chain.head_block_num(),
    })
}
