use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, BalanceResponse, error_response};
use crate::wallet::Address;

/// Spendable balance per asset, dividends earned so far included.
#[get("/balance/{address}/")]
pub async fn get_balance(state: web::Data<AppState>, path: web::Path<(String,)>) -> impl Responder {
    let address = path.into_inner().0;
    let Ok(owner) = address.parse::<Address>() else {
        return HttpResponse::BadRequest().body("invalid address");
    };

    let chain = state.chain.read();
    let (balances, outputs) = match (chain.balance_of(&owner), chain.unspent_outputs(&owner)) {
        (Ok(b), Ok(o)) => (b, o.len()),
        (Err(e), _) | (_, Err(e)) => return error_response(&e),
    };

    HttpResponse::Ok().json(BalanceResponse {
        address,
        balances: balances
            .iter()
            .filter(|a| !a.is_zero())
            .map(ToString::to_string)
            .collect(),
        outputs,
    })
}
