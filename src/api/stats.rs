use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, StatsResponse};
use crate::asset::{Asset, AssetType};

#[get("/stats/")]
pub async fn get_stats(state: web::Data<AppState>) -> impl Responder {
    let chain = state.chain.read();
    let keeper = chain.time_keeper();
    let supply = chain.head_state();

    let resp = StatsResponse {
        height: chain.head().map(|h| h.block_num),
        supply: Asset::new(supply.supply, AssetType::NATIVE).to_string(),
        issuance: AssetType::ALL
            .iter()
            .filter(|unit| supply.issuance[unit.index()] > 0)
            .map(|unit| Asset::new(supply.issuance[unit.index()], *unit).to_string())
            .collect(),
        target_block_time_secs: chain.config().block_interval_secs,
        time_keeper_window: keeper.window(),
        median_time: keeper.median_time(),
        next_block_time: keeper.next_time(),
        mempool_size: state.mempool.lock().len(),
        tracked_forks: state.forks.read().len(),
    };
    HttpResponse::Ok().json(resp)
}
