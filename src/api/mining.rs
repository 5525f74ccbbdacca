use std::sync::atomic::Ordering;

use actix_web::{HttpResponse, Responder, post, web};
use log::{debug, info, warn};
use uuid::Uuid;

use super::chain::accept_block;
use super::models::{
    AppState, MineRequest, MiningTemplate, SubmitRequest, TemplateRequest, TemplateResponse,
    error_response,
};
use crate::blockchain::{Block, Proof};
use crate::error::ChainError;
use crate::wallet::Address;

/// Unsealed next block from the head and the current mempool, plus the
/// difficulty its proof has to reach.
fn next_template(state: &AppState, miner_address: &str) -> Result<(Block, u64), HttpResponse> {
    let miner = miner_address
        .trim()
        .parse::<Address>()
        .map_err(|_| HttpResponse::BadRequest().body("invalid miner_address"))?;
    let candidates = state.mempool.lock().clone();
    let chain = state.chain.read();
    let block = chain
        .generate_next_block(miner, &candidates)
        .map_err(|e| error_response(&e))?;
    debug!(
        "MINER - template #{} with {} trxs from {} candidates",
        block.header.block_num,
        block.trxs.len(),
        candidates.len()
    );
    Ok((block, chain.next_difficulty()))
}

#[post("/mining/template/")]
pub async fn get_template(
    state: web::Data<AppState>,
    req: web::Json<TemplateRequest>,
) -> impl Responder {
    let (block, target) = match next_template(&state, &req.miner_address) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let template_id = Uuid::new_v4().to_string();
    let resp = TemplateResponse {
        template_id: template_id.clone(),
        block_num: block.header.block_num,
        previous_id: block.header.prev.to_string(),
        timestamp: block.header.timestamp,
        target,
        header_digest: block.header.digest().to_string(),
        block: block.clone(),
    };
    state.mining_templates.lock().insert(
        template_id.clone(),
        MiningTemplate {
            template_id,
            block,
            target,
        },
    );
    HttpResponse::Ok().json(resp)
}

/// Seal a template with an externally found nonce.
#[post("/mining/submit/")]
pub async fn submit_work(
    state: web::Data<AppState>,
    req: web::Json<SubmitRequest>,
) -> impl Responder {
    let req = req.into_inner();
    let Some(template) = state.mining_templates.lock().get(&req.template_id).cloned() else {
        return HttpResponse::NotFound().body("template not found");
    };

    let mut block = template.block;
    block.proof = Proof {
        branch: req.branch,
        nonce: req.nonce,
    };
    let actual = block.difficulty(state.miner.scratch_bytes);
    if actual < template.target {
        warn!(
            "MINER - template {} nonce {} reaches {actual} < {}",
            template.template_id, req.nonce, template.target
        );
        return error_response(&ChainError::ForkDifficultyInsufficient {
            required: template.target,
            actual,
        });
    }

    match accept_block(&state, block) {
        Ok(resp) => {
            state.mining_templates.lock().remove(&template.template_id);
            info!(
                "MINER - sealed block {} (difficulty={}, head=#{})",
                resp.block_id, resp.difficulty, resp.head_block_num
            );
            HttpResponse::Ok().json(resp)
        }
        Err(e) => error_response(&e),
    }
}

/// Build and seal the next block on this node's own miner threads. The job
/// stops as soon as another block moves the head.
#[post("/mining/mine/")]
pub async fn mine_block(state: web::Data<AppState>, req: web::Json<MineRequest>) -> impl Responder {
    let cancel = state.start_mining();
    let (mut block, target) = match next_template(&state, &req.miner_address) {
        Ok(t) => t,
        Err(resp) => return resp,
    };

    let worker = state.clone();
    let sealed = web::block(move || {
        if !block.mine(target, &worker.miner, &cancel) {
            if cancel.load(Ordering::Relaxed) {
                return Ok(None);
            }
            return Err(ChainError::unmet("nonce space exhausted"));
        }
        accept_block(&worker, block).map(Some)
    })
    .await;

    match sealed {
        Ok(Ok(Some(resp))) => {
            info!(
                "MINER - mined block {} (difficulty={}, head=#{})",
                resp.block_id, resp.difficulty, resp.head_block_num
            );
            HttpResponse::Ok().json(resp)
        }
        Ok(Ok(None)) => {
            debug!("MINER - job cancelled by a new head");
            HttpResponse::Conflict().body("head moved while mining")
        }
        Ok(Err(e)) => error_response(&e),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}
