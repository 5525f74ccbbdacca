mod balance;
mod chain;
mod health;
mod mining;
pub mod models;
mod stats;
mod tx;
mod wallet;

use actix_web::web::{self, ServiceConfig};

pub use chain::accept_block;
pub use models::AppState;
pub use tx::refresh_mempool;

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health::health_check)
            .service(chain::get_head)
            .service(chain::get_block)
            .service(chain::post_block)
            .service(chain::get_unknown_forks)
            .service(tx::post_transaction)
            .service(tx::get_transaction)
            .service(tx::get_mempool)
            .service(mining::get_template)
            .service(mining::submit_work)
            .service(mining::mine_block)
            .service(balance::get_balance)
            .service(stats::get_stats)
            .service(wallet::create_wallet)
            .service(wallet::sign_transaction),
    );
}
