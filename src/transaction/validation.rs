//! Per-transaction validation: claim conditions, signatures and the
//! per-asset balance sheet. Stateless; the caller resolves inputs.

use std::collections::{BTreeSet, HashSet};

use log::debug;

use super::claim::{Claim, ClaimType, OptionClaim, OrderClaim};
use super::model::{Output, SignedTransaction};
use super::utxo::MetaTrxInput;
use crate::asset::{Asset, AssetType};
use crate::error::{ChainError, ChainResult};
use crate::hash::{TrxId, sha256};
use crate::wallet::Address;

const UNITS: usize = AssetType::COUNT;

/// What the caller knows about the block the transaction would land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    pub ref_block_num: u32,
    pub ref_time: i64,
    /// `false` only when explaining a transaction without enforcing it.
    pub enforce_unspent: bool,
    pub coinbase_wait: u32,
}

/// Totals per asset type on each side of the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceSheet {
    pub inputs: [u128; UNITS],
    pub outputs: [u128; UNITS],
}

impl BalanceSheet {
    fn credit_input(&mut self, asset: Asset) -> ChainResult<()> {
        add_to(&mut self.inputs[asset.unit.index()], asset.amount)
    }

    fn credit_output(&mut self, asset: Asset) -> ChainResult<()> {
        add_to(&mut self.outputs[asset.unit.index()], asset.amount)
    }
}

fn add_to(slot: &mut u128, amount: u128) -> ChainResult<()> {
    *slot = slot
        .checked_add(amount)
        .ok_or_else(|| ChainError::malformed("balance overflow"))?;
    Ok(())
}

/// Result of a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrxEvaluation {
    pub trx_id: TrxId,
    /// Native surplus left for the miner and dividends.
    pub fees: Asset,
    /// Native value created by a coinbase.
    pub minted: Asset,
    pub sheet: BalanceSheet,
    /// Dividends collected by the inputs, per asset.
    pub dividends: [u128; UNITS],
    /// Cover payoffs created (debt issued) and burned, per asset.
    pub issued: [u128; UNITS],
    pub retired: [u128; UNITS],
    /// Native collateral moved into and out of cover outputs, indexed by
    /// the unit of the debt it backs.
    pub collateral_locked: [u128; UNITS],
    pub collateral_released: [u128; UNITS],
}

pub fn validate_transaction(
    trx: &SignedTransaction,
    inputs: &[MetaTrxInput],
    ctx: &ValidationContext,
) -> ChainResult<TrxEvaluation> {
    let mut state = TrxValidationState::new(trx, inputs, ctx)?;
    state.check_structure()?;
    state.check_window()?;
    for idx in 0..inputs.len() {
        state.validate_input(idx)?;
    }
    state.account_outputs()?;
    state.balance()
}

struct TrxValidationState<'a> {
    trx: &'a SignedTransaction,
    inputs: &'a [MetaTrxInput],
    ctx: &'a ValidationContext,
    signers: HashSet<Address>,
    /// Outputs already matched to an order or option input.
    claimed: Vec<bool>,
    eval: TrxEvaluation,
}

impl<'a> TrxValidationState<'a> {
    fn new(
        trx: &'a SignedTransaction,
        inputs: &'a [MetaTrxInput],
        ctx: &'a ValidationContext,
    ) -> ChainResult<Self> {
        let signers = trx.signed_addresses()?;
        Ok(Self {
            trx,
            inputs,
            ctx,
            signers,
            claimed: vec![false; trx.trx.outputs.len()],
            eval: TrxEvaluation {
                trx_id: trx.id(),
                fees: Asset::zero(AssetType::NATIVE),
                minted: Asset::zero(AssetType::NATIVE),
                sheet: BalanceSheet::default(),
                dividends: [0; UNITS],
                issued: [0; UNITS],
                retired: [0; UNITS],
                collateral_locked: [0; UNITS],
                collateral_released: [0; UNITS],
            },
        })
    }

    fn outputs(&self) -> &'a [Output] {
        &self.trx.trx.outputs
    }

    fn check_structure(&self) -> ChainResult<()> {
        let trx = &self.trx.trx;
        if trx.outputs.is_empty() {
            return Err(ChainError::malformed("transaction has no outputs"));
        }
        if trx.outputs.len() > usize::from(u16::MAX) || trx.inputs.len() > usize::from(u16::MAX) {
            return Err(ChainError::malformed("too many inputs or outputs"));
        }
        if trx.inputs.len() != self.inputs.len() {
            return Err(ChainError::malformed("resolved inputs do not match transaction"));
        }
        let mut seen = HashSet::new();
        for (input, resolved) in trx.inputs.iter().zip(self.inputs) {
            if input.output_ref != resolved.output_ref {
                return Err(ChainError::malformed("resolved inputs out of order"));
            }
            if !seen.insert(input.output_ref) {
                return Err(ChainError::malformed("duplicate input in transaction"));
            }
        }
        for out in &trx.outputs {
            if out.amount.is_zero() {
                return Err(ChainError::malformed("output amount must be > 0"));
            }
            out.claim.check_structure(&out.amount)?;
            if trx.is_coinbase() && out.claim.claim_type() != ClaimType::Signature {
                return Err(ChainError::malformed("coinbase may only pay plain signature outputs"));
            }
        }
        Ok(())
    }

    fn check_window(&self) -> ChainResult<()> {
        let trx = &self.trx.trx;
        let after = trx.valid_after.unwrap_or(0);
        if self.ctx.ref_block_num < after {
            return Err(ChainError::StaleOrFutureTimestamp(format!(
                "valid from block {after}, reference block is {}",
                self.ctx.ref_block_num
            )));
        }
        if let Some(blocks) = trx.valid_blocks {
            if u64::from(self.ctx.ref_block_num) >= u64::from(after) + u64::from(blocks) {
                return Err(ChainError::StaleOrFutureTimestamp(format!(
                    "expired after block {}",
                    u64::from(after) + u64::from(blocks) - 1
                )));
            }
        }
        Ok(())
    }

    fn signed(&self, addr: &Address) -> bool {
        self.signers.contains(addr)
    }

    fn validate_input(&mut self, idx: usize) -> ChainResult<()> {
        let inputs = self.inputs;
        let input = &inputs[idx];
        let r = input.output_ref;

        if self.ctx.enforce_unspent && input.meta.is_spent() {
            return Err(ChainError::AlreadySpent {
                trx_id: r.trx_id.to_string(),
                output_idx: r.output_idx,
            });
        }
        if input.source_is_coinbase
            && self.ctx.ref_block_num < input.source.block_num.saturating_add(self.ctx.coinbase_wait)
        {
            return Err(ChainError::unmet(format!(
                "coinbase output {}:{} spendable from block {}",
                r.trx_id,
                r.output_idx,
                input.source.block_num.saturating_add(self.ctx.coinbase_wait)
            )));
        }

        debug!(
            "validate input {} of {}: {:?} {}",
            idx,
            self.eval.trx_id,
            input.output.claim.claim_type(),
            input.output.amount
        );

        match &input.output.claim {
            Claim::Signature { owner } => self.require_signature(owner, "signature")?,
            Claim::Bid(order) | Claim::Ask(order) => self.validate_order(input, order)?,
            Claim::Long(order) => self.validate_long(input, order)?,
            Claim::Cover(cover) => {
                self.require_signature(&cover.owner, "cover")?;
                self.eval.sheet.credit_output(cover.payoff)?;
                add_to(&mut self.eval.retired[cover.payoff.unit.index()], cover.payoff.amount)?;
                add_to(
                    &mut self.eval.collateral_released[cover.payoff.unit.index()],
                    input.output.amount.amount,
                )?;
            }
            Claim::OptExecute(opt) => self.validate_option(input, opt)?,
            Claim::MultiSig(ms) => {
                let distinct: BTreeSet<&Address> = ms.addresses.iter().collect();
                let count = distinct.iter().filter(|a| self.signed(a)).count();
                if count < usize::from(ms.required) {
                    return Err(ChainError::unmet(format!(
                        "multi-sig has {count} of {} required signatures",
                        ms.required
                    )));
                }
            }
            Claim::Escrow(escrow) => {
                let (payer, payee, agent) = (
                    self.signed(&escrow.payer),
                    self.signed(&escrow.payee),
                    self.signed(&escrow.agent),
                );
                if !((agent && (payer || payee)) || (payer && payee)) {
                    return Err(ChainError::unmet("escrow needs agent plus a party, or both parties"));
                }
            }
            Claim::Password(pw) => {
                let joint = self.signed(&pw.payer) && self.signed(&pw.payee);
                let revealed =
                    self.signed(&pw.payee) && sha256(&self.trx.trx.inputs[idx].input_data) == pw.password_hash;
                if !(joint || revealed) {
                    return Err(ChainError::unmet("password claim not satisfied"));
                }
            }
        }

        self.eval.sheet.credit_input(input.output.amount)?;
        if !input.dividends.is_zero() {
            self.eval.sheet.credit_input(input.dividends)?;
            add_to(
                &mut self.eval.dividends[input.dividends.unit.index()],
                input.dividends.amount,
            )?;
        }
        Ok(())
    }

    fn require_signature(&self, owner: &Address, what: &str) -> ChainResult<()> {
        if !self.signed(owner) {
            return Err(ChainError::unmet(format!("{what} claim lacks signature of {owner}")));
        }
        Ok(())
    }

    /// Index of the first unclaimed output accepted by `pred`, now claimed.
    fn claim_output(&mut self, pred: impl Fn(&Output) -> bool) -> Option<usize> {
        let outputs = self.outputs();
        let found = outputs
            .iter()
            .enumerate()
            .find(|(j, out)| !self.claimed[*j] && pred(*out))
            .map(|(j, _)| j)?;
        self.claimed[found] = true;
        Some(found)
    }

    /// Part of an order filled by this transaction: everything not carried
    /// over into an identical change order.
    fn filled_amount(&mut self, input: &MetaTrxInput, order: &OrderClaim) -> ChainResult<Asset> {
        let offered = input.output.amount;
        let change = self.claim_output(|o| o.claim == input.output.claim && o.amount.unit == offered.unit);
        let carried = change.map(|j| self.outputs()[j].amount.amount).unwrap_or(0);
        if carried >= offered.amount {
            return Err(ChainError::unmet("order change does not fill anything"));
        }
        let filled = Asset::new(offered.amount - carried, offered.unit);
        if change.is_some() && filled.amount < order.min_trade {
            return Err(ChainError::unmet(format!(
                "partial fill {filled} below minimum trade"
            )));
        }
        Ok(filled)
    }

    fn validate_order(&mut self, input: &MetaTrxInput, order: &OrderClaim) -> ChainResult<()> {
        if self.signed(&order.owner) {
            return Ok(());
        }
        let filled = self.filled_amount(input, order)?;
        let owed = order.price.convert(filled)?;
        let owner = order.owner;
        self.claim_output(|o| {
            o.claim == Claim::Signature { owner }
                && o.amount.unit == owed.unit
                && o.amount.amount >= owed.amount
        })
        .ok_or_else(|| ChainError::unmet(format!("no output pays {owed} to order owner {owner}")))?;
        Ok(())
    }

    fn validate_long(&mut self, input: &MetaTrxInput, order: &OrderClaim) -> ChainResult<()> {
        if self.signed(&order.owner) {
            return Ok(());
        }
        let filled = self.filled_amount(input, order)?;
        let max_payoff = order.price.convert(filled)?;
        let min_collateral = filled
            .amount
            .checked_mul(2)
            .ok_or_else(|| ChainError::malformed("collateral overflow"))?;
        let owner = order.owner;
        self.claim_output(|o| match &o.claim {
            Claim::Cover(cover) => {
                cover.owner == owner
                    && cover.payoff.unit == max_payoff.unit
                    && cover.payoff.amount <= max_payoff.amount
                    && o.amount.amount >= min_collateral
            }
            _ => false,
        })
        .ok_or_else(|| ChainError::unmet(format!("no cover output opens long of {filled} for {owner}")))?;
        Ok(())
    }

    fn validate_option(&mut self, input: &MetaTrxInput, opt: &OptionClaim) -> ChainResult<()> {
        if self.ctx.ref_time >= opt.expire_time {
            return self.require_signature(&opt.writer, "expired option");
        }
        self.require_signature(&opt.holder, "option")?;
        let strike = opt.strike.convert(input.output.amount)?;
        let writer = opt.writer;
        self.claim_output(|o| {
            o.claim == Claim::Signature { owner: writer }
                && o.amount.unit == strike.unit
                && o.amount.amount >= strike.amount
        })
        .ok_or_else(|| ChainError::unmet(format!("option exercise must pay {strike} to writer")))?;
        Ok(())
    }

    fn account_outputs(&mut self) -> ChainResult<()> {
        for (j, out) in self.outputs().iter().enumerate() {
            self.eval.sheet.credit_output(out.amount)?;
            if let Claim::Cover(cover) = &out.claim {
                // only the counter-side of a filled long may open debt
                if !self.claimed[j] {
                    return Err(ChainError::unmet(format!(
                        "cover output {j} is not backed by a matched long"
                    )));
                }
                self.eval.sheet.credit_input(cover.payoff)?;
                add_to(&mut self.eval.issued[cover.payoff.unit.index()], cover.payoff.amount)?;
                add_to(
                    &mut self.eval.collateral_locked[cover.payoff.unit.index()],
                    out.amount.amount,
                )?;
            }
        }
        Ok(())
    }

    fn balance(mut self) -> ChainResult<TrxEvaluation> {
        let sheet = self.eval.sheet;
        for unit in AssetType::ALL.into_iter().filter(|u| *u != AssetType::NATIVE) {
            let (ins, outs) = (sheet.inputs[unit.index()], sheet.outputs[unit.index()]);
            if ins != outs {
                return Err(ChainError::Unbalanced {
                    unit: unit.to_string(),
                    inputs: ins,
                    outputs: outs,
                });
            }
        }

        let native = AssetType::NATIVE.index();
        let (ins, outs) = (sheet.inputs[native], sheet.outputs[native]);
        if self.trx.trx.is_coinbase() {
            self.eval.minted = Asset::new(outs, AssetType::NATIVE);
        } else if ins < outs {
            return Err(ChainError::Unbalanced {
                unit: AssetType::NATIVE.to_string(),
                inputs: ins,
                outputs: outs,
            });
        } else {
            self.eval.fees = Asset::new(ins - outs, AssetType::NATIVE);
        }
        Ok(self.eval)
    }
}

#[cfg(test)]
mod tests {
    use secp256k1::SecretKey;

    use super::*;
    use crate::asset::Price;
    use crate::transaction::claim::{CoverClaim, EscrowClaim, MultiSigClaim, PasswordClaim};
    use crate::transaction::model::{Input, Transaction};
    use crate::transaction::utxo::{MetaTrxOutput, OutputRef, SpentRef, TrxNum};
    use crate::wallet::address_of;

    fn key(b: u8) -> SecretKey {
        SecretKey::from_slice(&[b; 32]).unwrap()
    }

    fn addr(b: u8) -> Address {
        address_of(&key(b))
    }

    fn bts(n: u64) -> Asset {
        Asset::from_units(n, AssetType::Bts)
    }

    fn usd(n: u64) -> Asset {
        Asset::from_units(n, AssetType::Usd)
    }

    fn ctx() -> ValidationContext {
        ValidationContext {
            ref_block_num: 10,
            ref_time: 1_000,
            enforce_unspent: true,
            coinbase_wait: 5,
        }
    }

    fn resolved(tag: u8, output: Output) -> MetaTrxInput {
        MetaTrxInput {
            output_ref: OutputRef::new(sha256(&[tag]), 0),
            source: TrxNum::new(1, 1),
            source_is_coinbase: false,
            output,
            meta: MetaTrxOutput::default(),
            dividends: Asset::zero(AssetType::NATIVE),
        }
    }

    fn spend(inputs: &[MetaTrxInput], outputs: Vec<Output>, signers: &[u8]) -> SignedTransaction {
        let trx = Transaction::new(
            inputs.iter().map(|i| Input::new(i.output_ref)).collect(),
            outputs,
        );
        let keys: Vec<SecretKey> = signers.iter().map(|b| key(*b)).collect();
        trx.sign(&keys.iter().collect::<Vec<_>>())
    }

    fn price() -> Price {
        // 2 USD per BTS
        Price::from_fraction(2, 1, AssetType::Bts, AssetType::Usd).unwrap()
    }

    #[test]
    fn signature_spend_pays_fee() {
        let inputs = vec![resolved(1, Output::to(addr(1), bts(10)))];
        let trx = spend(&inputs, vec![Output::to(addr(2), bts(9))], &[1]);
        let eval = validate_transaction(&trx, &inputs, &ctx()).unwrap();
        assert_eq!(eval.fees, bts(1));
    }

    #[test]
    fn wrong_signer_is_rejected() {
        let inputs = vec![resolved(1, Output::to(addr(1), bts(10)))];
        let trx = spend(&inputs, vec![Output::to(addr(2), bts(10))], &[2]);
        assert!(matches!(
            validate_transaction(&trx, &inputs, &ctx()),
            Err(ChainError::ClaimConditionUnmet(_))
        ));
    }

    #[test]
    fn spent_input_is_rejected_unless_explaining() {
        let mut input = resolved(1, Output::to(addr(1), bts(10)));
        input.meta.spent_by = Some(SpentRef {
            trx: TrxNum::new(3, 1),
            input_idx: 0,
        });
        let inputs = vec![input];
        let trx = spend(&inputs, vec![Output::to(addr(2), bts(10))], &[1]);
        assert!(matches!(
            validate_transaction(&trx, &inputs, &ctx()),
            Err(ChainError::AlreadySpent { .. })
        ));
        let explain = ValidationContext {
            enforce_unspent: false,
            ..ctx()
        };
        assert!(validate_transaction(&trx, &inputs, &explain).is_ok());
    }

    #[test]
    fn native_outputs_cannot_exceed_inputs() {
        let inputs = vec![resolved(1, Output::to(addr(1), bts(10)))];
        let trx = spend(&inputs, vec![Output::to(addr(2), bts(11))], &[1]);
        assert!(matches!(
            validate_transaction(&trx, &inputs, &ctx()),
            Err(ChainError::Unbalanced { .. })
        ));
    }

    #[test]
    fn foreign_assets_must_balance_exactly() {
        let inputs = vec![
            resolved(1, Output::to(addr(1), usd(10))),
            resolved(2, Output::to(addr(1), bts(1))),
        ];
        let trx = spend(&inputs, vec![Output::to(addr(2), usd(9))], &[1]);
        match validate_transaction(&trx, &inputs, &ctx()) {
            Err(ChainError::Unbalanced { unit, .. }) => assert_eq!(unit, "USD"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dividends_count_as_inputs() {
        let mut input = resolved(1, Output::to(addr(1), bts(10)));
        input.dividends = bts(2);
        let inputs = vec![input];
        let trx = spend(&inputs, vec![Output::to(addr(2), bts(12))], &[1]);
        let eval = validate_transaction(&trx, &inputs, &ctx()).unwrap();
        assert!(eval.fees.is_zero());
        assert_eq!(eval.dividends[0], bts(2).amount);
    }

    #[test]
    fn immature_coinbase_cannot_be_spent() {
        let mut input = resolved(1, Output::to(addr(1), bts(10)));
        input.source = TrxNum::new(8, 0);
        input.source_is_coinbase = true;
        let inputs = vec![input];
        let trx = spend(&inputs, vec![Output::to(addr(2), bts(10))], &[1]);
        assert!(matches!(
            validate_transaction(&trx, &inputs, &ctx()),
            Err(ChainError::ClaimConditionUnmet(_))
        ));
        let later = ValidationContext {
            ref_block_num: 13,
            ..ctx()
        };
        assert!(validate_transaction(&trx, &inputs, &later).is_ok());
    }

    #[test]
    fn validity_window_is_enforced() {
        let inputs = vec![resolved(1, Output::to(addr(1), bts(10)))];
        let mut trx = Transaction::new(
            vec![Input::new(inputs[0].output_ref)],
            vec![Output::to(addr(2), bts(10))],
        );
        trx.valid_after = Some(11);
        trx.valid_blocks = Some(2);
        let signed = trx.sign(&[&key(1)]);
        assert!(matches!(
            validate_transaction(&signed, &inputs, &ctx()),
            Err(ChainError::StaleOrFutureTimestamp(_))
        ));
        let at = |n| ValidationContext {
            ref_block_num: n,
            ..ctx()
        };
        assert!(validate_transaction(&signed, &inputs, &at(12)).is_ok());
        assert!(validate_transaction(&signed, &inputs, &at(13)).is_err());
    }

    fn ask(owner: u8, min_trade: u128) -> Claim {
        Claim::Ask(OrderClaim {
            owner: addr(owner),
            price: price(),
            min_trade,
        })
    }

    #[test]
    fn ask_filled_by_counter_payment() {
        // seller 1 offers 10 BTS at 2 USD each; buyer 2 pays 20 USD
        let inputs = vec![
            resolved(1, Output::new(bts(10), ask(1, 0))),
            resolved(2, Output::to(addr(2), usd(20))),
        ];
        let outputs = vec![Output::to(addr(1), usd(20)), Output::to(addr(2), bts(10))];
        let trx = spend(&inputs, outputs, &[2]);
        assert!(validate_transaction(&trx, &inputs, &ctx()).is_ok());
    }

    #[test]
    fn ask_underpaid_is_rejected() {
        let inputs = vec![
            resolved(1, Output::new(bts(10), ask(1, 0))),
            resolved(2, Output::to(addr(2), usd(19))),
        ];
        let outputs = vec![Output::to(addr(1), usd(19)), Output::to(addr(2), bts(10))];
        let trx = spend(&inputs, outputs, &[2]);
        assert!(matches!(
            validate_transaction(&trx, &inputs, &ctx()),
            Err(ChainError::ClaimConditionUnmet(_))
        ));
    }

    #[test]
    fn partial_fill_keeps_change_order_and_minimum() {
        let inputs = vec![
            resolved(1, Output::new(bts(10), ask(1, bts(4).amount))),
            resolved(2, Output::to(addr(2), usd(8))),
        ];
        let outputs = vec![
            Output::new(bts(6), ask(1, bts(4).amount)),
            Output::to(addr(1), usd(8)),
            Output::to(addr(2), bts(4)),
        ];
        let trx = spend(&inputs, outputs, &[2]);
        assert!(validate_transaction(&trx, &inputs, &ctx()).is_ok());

        // 3 BTS fill is under the 4 BTS minimum
        let inputs = vec![
            resolved(1, Output::new(bts(10), ask(1, bts(4).amount))),
            resolved(2, Output::to(addr(2), usd(6))),
        ];
        let outputs = vec![
            Output::new(bts(7), ask(1, bts(4).amount)),
            Output::to(addr(1), usd(6)),
            Output::to(addr(2), bts(3)),
        ];
        let trx = spend(&inputs, outputs, &[2]);
        assert!(validate_transaction(&trx, &inputs, &ctx()).is_err());
    }

    #[test]
    fn one_payment_cannot_fill_two_orders() {
        let inputs = vec![
            resolved(1, Output::new(bts(10), ask(1, 0))),
            resolved(2, Output::new(bts(10), ask(1, 0))),
            resolved(3, Output::to(addr(2), usd(20))),
        ];
        let outputs = vec![Output::to(addr(1), usd(20)), Output::to(addr(2), bts(20))];
        let trx = spend(&inputs, outputs, &[2]);
        assert!(matches!(
            validate_transaction(&trx, &inputs, &ctx()),
            Err(ChainError::ClaimConditionUnmet(_))
        ));
    }

    #[test]
    fn bid_cancelled_by_owner() {
        let bid = Claim::Bid(OrderClaim {
            owner: addr(1),
            price: price(),
            min_trade: 0,
        });
        let inputs = vec![resolved(1, Output::new(usd(20), bid))];
        let trx = spend(&inputs, vec![Output::to(addr(1), usd(20))], &[1]);
        assert!(validate_transaction(&trx, &inputs, &ctx()).is_ok());
    }

    #[test]
    fn bid_filled_by_seller() {
        let bid = Claim::Bid(OrderClaim {
            owner: addr(1),
            price: price(),
            min_trade: 0,
        });
        // buyer 1 offers 20 USD for BTS at 2 USD/BTS, seller 2 delivers 10 BTS
        let inputs = vec![
            resolved(1, Output::new(usd(20), bid)),
            resolved(2, Output::to(addr(2), bts(10))),
        ];
        let outputs = vec![Output::to(addr(1), bts(10)), Output::to(addr(2), usd(20))];
        let trx = spend(&inputs, outputs, &[2]);
        assert!(validate_transaction(&trx, &inputs, &ctx()).is_ok());
    }

    #[test]
    fn long_opens_cover_and_issues_debt() {
        let long = Claim::Long(OrderClaim {
            owner: addr(1),
            price: price(),
            min_trade: 0,
        });
        // long 1 puts up 10 BTS, short 2 matches with 10 BTS and receives 20 new USD
        let inputs = vec![
            resolved(1, Output::new(bts(10), long)),
            resolved(2, Output::to(addr(2), bts(10))),
        ];
        let cover = Claim::Cover(CoverClaim {
            owner: addr(1),
            payoff: usd(20),
        });
        let outputs = vec![Output::new(bts(20), cover), Output::to(addr(2), usd(20))];
        let trx = spend(&inputs, outputs, &[2]);
        let eval = validate_transaction(&trx, &inputs, &ctx()).unwrap();
        assert_eq!(eval.issued[AssetType::Usd.index()], usd(20).amount);
        assert_eq!(eval.collateral_locked[AssetType::Usd.index()], bts(20).amount);
    }

    #[test]
    fn cover_burns_payoff() {
        let cover = Claim::Cover(CoverClaim {
            owner: addr(1),
            payoff: usd(20),
        });
        let inputs = vec![
            resolved(1, Output::new(bts(20), cover)),
            resolved(2, Output::to(addr(1), usd(20))),
        ];
        let trx = spend(&inputs, vec![Output::to(addr(1), bts(20))], &[1]);
        let eval = validate_transaction(&trx, &inputs, &ctx()).unwrap();
        assert_eq!(eval.retired[AssetType::Usd.index()], usd(20).amount);
        assert_eq!(eval.collateral_released[AssetType::Usd.index()], bts(20).amount);

        // without burning the USD the sheet does not balance
        let inputs = vec![resolved(1, Output::new(bts(20), inputs[0].output.claim.clone()))];
        let trx = spend(&inputs, vec![Output::to(addr(1), bts(20))], &[1]);
        assert!(matches!(
            validate_transaction(&trx, &inputs, &ctx()),
            Err(ChainError::Unbalanced { .. })
        ));
    }

    #[test]
    fn cover_without_long_is_rejected() {
        // 1 BTS cannot mint a million USD by declaring its own cover
        let inputs = vec![resolved(1, Output::to(addr(1), bts(1)))];
        let cover = Claim::Cover(CoverClaim {
            owner: addr(1),
            payoff: usd(1_000_000),
        });
        let outputs = vec![Output::new(bts(1), cover), Output::to(addr(1), usd(1_000_000))];
        let trx = spend(&inputs, outputs, &[1]);
        assert!(matches!(
            validate_transaction(&trx, &inputs, &ctx()),
            Err(ChainError::ClaimConditionUnmet(_))
        ));

        // a long cancelled by its owner does not license a cover either
        let long = Claim::Long(OrderClaim {
            owner: addr(1),
            price: price(),
            min_trade: 0,
        });
        let inputs = vec![resolved(1, Output::new(bts(10), long))];
        let cover = Claim::Cover(CoverClaim {
            owner: addr(1),
            payoff: usd(20),
        });
        let outputs = vec![Output::new(bts(10), cover), Output::to(addr(1), usd(20))];
        let trx = spend(&inputs, outputs, &[1]);
        assert!(validate_transaction(&trx, &inputs, &ctx()).is_err());
    }

    fn option(expire_time: i64) -> Claim {
        Claim::OptExecute(OptionClaim {
            writer: addr(1),
            holder: addr(2),
            strike: price(),
            expire_time,
        })
    }

    #[test]
    fn option_exercised_before_expiry_with_strike() {
        let inputs = vec![
            resolved(1, Output::new(bts(10), option(2_000))),
            resolved(2, Output::to(addr(2), usd(20))),
        ];
        let outputs = vec![Output::to(addr(1), usd(20)), Output::to(addr(2), bts(10))];
        let trx = spend(&inputs, outputs, &[2]);
        assert!(validate_transaction(&trx, &inputs, &ctx()).is_ok());

        // after expiry only the writer may take it back
        let late = ValidationContext {
            ref_time: 2_000,
            ..ctx()
        };
        assert!(validate_transaction(&trx, &inputs, &late).is_err());
        let reclaim = vec![resolved(1, Output::new(bts(10), option(2_000)))];
        let trx = spend(&reclaim, vec![Output::to(addr(1), bts(10))], &[1]);
        assert!(validate_transaction(&trx, &reclaim, &late).is_ok());
        assert!(validate_transaction(&trx, &reclaim, &ctx()).is_err());
    }

    #[test]
    fn multisig_counts_distinct_signers() {
        let claim = Claim::MultiSig(MultiSigClaim {
            required: 2,
            addresses: vec![addr(1), addr(2), addr(3)],
        });
        let inputs = vec![resolved(1, Output::new(bts(5), claim))];
        let out = vec![Output::to(addr(4), bts(5))];
        assert!(validate_transaction(&spend(&inputs, out.clone(), &[1, 3]), &inputs, &ctx()).is_ok());
        assert!(validate_transaction(&spend(&inputs, out.clone(), &[1, 1]), &inputs, &ctx()).is_err());
        assert!(validate_transaction(&spend(&inputs, out, &[4, 2]), &inputs, &ctx()).is_err());
    }

    #[test]
    fn escrow_combinations() {
        let claim = Claim::Escrow(EscrowClaim {
            payer: addr(1),
            payee: addr(2),
            agent: addr(3),
        });
        let inputs = vec![resolved(1, Output::new(bts(5), claim))];
        let out = vec![Output::to(addr(2), bts(5))];
        let check = |signers: &[u8]| {
            validate_transaction(&spend(&inputs, out.clone(), signers), &inputs, &ctx()).is_ok()
        };
        assert!(check(&[3, 1]));
        assert!(check(&[3, 2]));
        assert!(check(&[1, 2]));
        assert!(!check(&[3]));
        assert!(!check(&[2]));
    }

    #[test]
    fn password_claim() {
        let claim = Claim::Password(PasswordClaim {
            payer: addr(1),
            payee: addr(2),
            password_hash: sha256(b"open sesame"),
        });
        let inputs = vec![resolved(1, Output::new(bts(5), claim))];
        let build = |pw: &[u8], signers: &[u8]| {
            let mut input = Input::new(inputs[0].output_ref);
            input.input_data = pw.to_vec();
            let trx = Transaction::new(vec![input], vec![Output::to(addr(2), bts(5))]);
            let keys: Vec<SecretKey> = signers.iter().map(|b| key(*b)).collect();
            trx.sign(&keys.iter().collect::<Vec<_>>())
        };
        assert!(validate_transaction(&build(b"open sesame", &[2]), &inputs, &ctx()).is_ok());
        assert!(validate_transaction(&build(b"wrong", &[2]), &inputs, &ctx()).is_err());
        assert!(validate_transaction(&build(b"", &[1, 2]), &inputs, &ctx()).is_ok());
        assert!(validate_transaction(&build(b"open sesame", &[1]), &inputs, &ctx()).is_err());
    }

    #[test]
    fn coinbase_mints_native_only() {
        let trx = SignedTransaction::unsigned(Transaction::coinbase(10, vec![Output::to(addr(1), bts(50))]));
        let eval = validate_transaction(&trx, &[], &ctx()).unwrap();
        assert_eq!(eval.minted, bts(50));

        let foreign = SignedTransaction::unsigned(Transaction::coinbase(10, vec![Output::to(addr(1), usd(1))]));
        assert!(matches!(
            validate_transaction(&foreign, &[], &ctx()),
            Err(ChainError::Unbalanced { .. })
        ));
    }

    #[test]
    fn duplicate_inputs_are_malformed() {
        let input = resolved(1, Output::to(addr(1), bts(10)));
        let inputs = vec![input.clone(), input];
        let trx = spend(&inputs, vec![Output::to(addr(2), bts(20))], &[1]);
        assert!(matches!(
            validate_transaction(&trx, &inputs, &ctx()),
            Err(ChainError::MalformedData(_))
        ));
    }
}
