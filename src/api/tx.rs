use actix_web::{HttpResponse, Responder, get, post, web};
use log::{debug, info, warn};

use super::models::{AppState, MempoolResponse, NewTxResponse, TrxResponse, error_response};
use crate::asset::{Asset, AssetType};
use crate::hash::TrxId;
use crate::store::{ChainStore, KvStore};
use crate::transaction::SignedTransaction;

/// Validate a signed transaction against the head and queue it for the next block.
#[post("/trx/")]
pub async fn post_transaction(
    state: web::Data<AppState>,
    body: web::Json<SignedTransaction>,
) -> impl Responder {
    let trx = body.into_inner();
    let trx_id = trx.id();

    let eval = {
        let chain = state.chain.read();
        match chain.evaluate_transaction(&trx) {
            Ok(eval) => eval,
            Err(e) => {
                warn!("TX - rejected {trx_id}: {e}");
                return error_response(&e);
            }
        }
    };

    let mut mempool = state.mempool.lock();
    if mempool.iter().any(|t| t.id() == trx_id) {
        return HttpResponse::Conflict().body("transaction already in mempool");
    }
    mempool.push(trx);
    info!(
        "TX - accepted {trx_id} (fees={}, mempool={})",
        eval.fees,
        mempool.len()
    );

    HttpResponse::Ok().json(NewTxResponse {
        trx_id: trx_id.to_string(),
        fees: eval.fees.to_string(),
    })
}

#[get("/trx/{id}/")]
pub async fn get_transaction(state: web::Data<AppState>, path: web::Path<(String,)>) -> impl Responder {
    let Ok(id) = path.into_inner().0.parse::<TrxId>() else {
        return HttpResponse::BadRequest().body("invalid transaction id");
    };
    let meta = match state.chain.read().fetch_trx(&id) {
        Ok(Some(meta)) => meta,
        Ok(None) => return HttpResponse::NotFound().body("transaction not found"),
        Err(e) => return error_response(&e),
    };
    HttpResponse::Ok().json(TrxResponse {
        trx_id: id.to_string(),
        block_num: meta.location.block_num,
        trx_idx: meta.location.trx_idx,
        spent: meta.meta_outputs.iter().map(|m| m.is_spent()).collect(),
        trx: meta.trx,
    })
}

#[get("/mempool/")]
pub async fn get_mempool(state: web::Data<AppState>) -> impl Responder {
    let mempool = state.mempool.lock();
    HttpResponse::Ok().json(MempoolResponse {
        size: mempool.len(),
        transactions: mempool.iter().map(|t| t.id().to_string()).collect(),
    })
}

/// Drop transactions that no longer validate on top of the current head,
/// including the ones the head now contains.
pub fn refresh_mempool<S: KvStore>(chain: &ChainStore<S>, mempool: &mut Vec<SignedTransaction>) {
    let before = mempool.len();
    let mut fees = Asset::zero(AssetType::NATIVE);
    mempool.retain(|trx| match chain.evaluate_transaction(trx) {
        Ok(eval) => {
            fees.amount = fees.amount.saturating_add(eval.fees.amount);
            true
        }
        Err(e) => {
            debug!("MEMPOOL - dropping {}: {e}", trx.id());
            false
        }
    });
    debug!(
        "MEMPOOL - {} -> {} (pending fees {})",
        before,
        mempool.len(),
        fees
    );
}
