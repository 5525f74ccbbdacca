use actix_web::{App, HttpServer, web};
use dotenvy::dotenv;

use bts_chain::api::{self, AppState};
use bts_chain::config::AppConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let cfg = AppConfig::from_env();
    let state = AppState::open(&cfg).map_err(std::io::Error::other)?;
    {
        let chain = state.chain.read();
        log::info!(
            "chain opened at {} (head #{:?}, next difficulty {})",
            cfg.data_dir,
            chain.head().map(|h| h.block_num),
            chain.next_difficulty()
        );
    }

    println!("⛓️ Starting bts chain node at http://{}:{}", cfg.host, cfg.port);

    let state = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::init_routes)
    })
    .bind((cfg.host.as_str(), cfg.port))?
    .run()
    .await
}
