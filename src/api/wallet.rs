use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;
use crate::wallet::{address_of, generate_keypair_hex, secret_from_hex};

#[derive(Serialize)]
struct NewWalletResponse {
    private_key: String,
    public_key: String,
    address: String,
}

#[derive(Deserialize)]
pub struct SignRequest {
    /// One hex secret per required signer.
    pub private_keys: Vec<String>,
    pub trx: Transaction,
}

#[post("/wallet/new/")]
pub async fn create_wallet() -> impl Responder {
    let (sk, pk, addr) = generate_keypair_hex();
    HttpResponse::Ok().json(NewWalletResponse {
        private_key: sk,
        public_key: pk,
        address: addr,
    })
}

/// Dev helper: sign a transaction server-side and hand it back ready for `/trx/`.
#[post("/wallet/sign/")]
pub async fn sign_transaction(body: web::Json<SignRequest>) -> impl Responder {
    let SignRequest { private_keys, trx } = body.into_inner();
    let mut keys = Vec::with_capacity(private_keys.len());
    for hex_key in &private_keys {
        match secret_from_hex(hex_key) {
            Ok(sk) => keys.push(sk),
            Err(e) => return HttpResponse::BadRequest().body(e),
        }
    }
    log::debug!(
        "WALLET - signing {} for {:?}",
        trx.id(),
        keys.iter().map(address_of).collect::<Vec<_>>()
    );
    let refs: Vec<_> = keys.iter().collect();
    HttpResponse::Ok().json(trx.sign(&refs))
}
