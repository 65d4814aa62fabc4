//! Mark-to-market and final settlement.
//!
//! Both run the same round: collect every loss into the market's settlement account,
//! socialize the wins if less came in than was owed, pay the wins out, and check the
//! settlement account is empty again. Final settlement tolerates a small rounding
//! residual and sweeps it to the global reward pool.

use super::core::Engine;
use super::requests;
use super::results::{EngineError, FatalError, MarginStatus, SettlementResult};
use crate::account::{AccountId, AccountType};
use crate::clock::Clock;
use crate::distributor::LossDistributor;
use crate::events::{EventPayload, EventSink, LossSocializationEvent};
use crate::state::LedgerState;
use crate::transfer::{LedgerMovement, Transfer, TransferRequest, TransferType};
use crate::types::{Amount, AssetId, Context, MarketId, PartyId};
use std::collections::BTreeSet;
use tracing::{debug, error, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Round {
    MarkToMarket,
    Final,
}

struct Outcome {
    movements: Vec<LedgerMovement>,
    residual: Amount,
}

impl<C: Clock, S: EventSink> Engine<C, S> {
    /// Settles one mark-to-market round. transfers must be MtmLoss/Loss before MtmWin/Win.
    pub fn mark_to_market(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
        transfers: &[Transfer],
    ) -> Result<SettlementResult, EngineError> {
        self.mark_to_market_with(state, ctx, market, asset, transfers, |_| true)
    }

    /// Same as `mark_to_market`, parties for which `use_general_for_margin` is false
    /// only lose out of their margin and bond accounts.
    pub fn mark_to_market_with<F>(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
        transfers: &[Transfer],
        use_general_for_margin: F,
    ) -> Result<SettlementResult, EngineError>
    where
        F: Fn(&PartyId) -> bool,
    {
        let span = info_span!("mark_to_market", trace_id = %ctx.trace_id, market = %market, asset = %asset);
        let _guard = span.enter();

        let outcome = self.settle(state, ctx, market, asset, transfers, &use_general_for_margin, Round::MarkToMarket)?;
        if !outcome.residual.is_zero() {
            error!(market = %market, balance = %outcome.residual, "settlement account not drained after mark to market");
            return Err(FatalError::SettlementBalanceNotZero {
                market: market.clone(),
                balance: outcome.residual,
            }
            .into());
        }

        let mut seen = BTreeSet::new();
        let mut margins: Vec<MarginStatus> = Vec::new();
        for party in transfers.iter().map(|t| &t.owner) {
            if !party.is_network() && seen.insert(party) {
                margins.push(Self::margin_status(state, market, party, asset, Amount::zero()));
            }
        }

        self.emit_movements(ctx, &outcome.movements);
        Ok(SettlementResult {
            movements: outcome.movements,
            margins,
        })
    }

    /// Settles a closing market. a residual up to the configured factor goes to global rewards.
    pub fn final_settlement(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
        transfers: &[Transfer],
    ) -> Result<Vec<LedgerMovement>, EngineError> {
        self.final_settlement_with(state, ctx, market, asset, transfers, |_| true)
    }

    pub fn final_settlement_with<F>(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
        transfers: &[Transfer],
        use_general_for_margin: F,
    ) -> Result<Vec<LedgerMovement>, EngineError>
    where
        F: Fn(&PartyId) -> bool,
    {
        let span = info_span!("final_settlement", trace_id = %ctx.trace_id, market = %market, asset = %asset);
        let _guard = span.enter();

        let mut outcome = self.settle(state, ctx, market, asset, transfers, &use_general_for_margin, Round::Final)?;
        if !outcome.residual.is_zero() {
            let factor = self.config.final_settlement_factor();
            if outcome.residual > factor {
                error!(
                    market = %market,
                    balance = %outcome.residual,
                    factor = %factor,
                    "settlement residual above rounding factor"
                );
                return Err(FatalError::SettlementBalanceNotZero {
                    market: market.clone(),
                    balance: outcome.residual,
                }
                .into());
            }

            warn!(market = %market, residual = %outcome.residual, "sweeping settlement rounding residual to global reward");
            let settlement = AccountId::market_system(market, asset, AccountType::Settlement);
            let reward = AccountId::asset_system(asset, AccountType::GlobalReward);
            let sweep = requests::direct(settlement, reward, outcome.residual, asset, TransferType::ClearAccount);
            let movement = self.run_request(state, ctx, &sweep)?;
            outcome.movements.push(movement);
        }

        self.emit_movements(ctx, &outcome.movements);
        Ok(outcome.movements)
    }

    // 8.4: one settlement round. every request is built (and so every account resolved)
    // before the first balance moves.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
        transfers: &[Transfer],
        use_general_for_margin: &dyn Fn(&PartyId) -> bool,
        round: Round,
    ) -> Result<Outcome, EngineError> {
        if transfers.is_empty() {
            return Ok(Outcome {
                movements: Vec::new(),
                residual: Amount::zero(),
            });
        }

        let accounts = requests::market_accounts(&state.store, market, asset)?;
        if round == Round::Final && !state.store.contains(&AccountId::asset_system(asset, AccountType::GlobalReward)) {
            return Err(EngineError::MissingSystemAccounts {
                market: market.clone(),
                asset: asset.clone(),
            });
        }

        let mut losses: Vec<(&Transfer, TransferRequest)> = Vec::new();
        let mut wins: Vec<(&Transfer, TransferRequest)> = Vec::new();
        for transfer in transfers {
            let use_general = use_general_for_margin(&transfer.owner);
            let req = requests::settlement_request(&state.store, &accounts, market, transfer, use_general)?;
            if transfer.kind.is_loss() {
                losses.push((transfer, req));
            } else {
                wins.push((transfer, req));
            }
        }

        let mut movements = Vec::with_capacity(transfers.len());
        let mut expected = Amount::zero();
        let mut shortfalls = Vec::new();

        // collect losses
        for (transfer, req) in &losses {
            // what the party itself can put up, insurance excluded
            let available: Amount = req
                .from
                .iter()
                .filter(|id| **id != accounts.insurance)
                .map(|id| state.store.balance(id).unwrap_or_default())
                .sum();

            let movement = self.run_request(state, ctx, req)?;
            expected += req.amount;

            if !transfer.owner.is_network() && available < req.amount {
                let missing = req.amount.saturating_sub(available);
                warn!(
                    party = %transfer.owner,
                    market = %market,
                    amount = %missing,
                    "loss socialization missing amount to be collected or used from insurance pool"
                );
                shortfalls.push(self.next_event(
                    ctx,
                    EventPayload::LossSocialization(LossSocializationEvent {
                        market: market.clone(),
                        party: transfer.owner.clone(),
                        amount: missing,
                    }),
                ));
            }
            movements.push(movement);
        }
        self.publish(shortfalls);

        // socialize wins when the settlement account came up short
        let collected = state.store.balance(&accounts.settlement)?;
        let mut distributor = LossDistributor::new(market.clone(), expected, collected);
        if distributor.is_active() && !wins.is_empty() {
            warn!(
                market = %market,
                asset = %asset,
                expected = %expected,
                collected = %collected,
                "entering loss socialization"
            );
            for (transfer, req) in &wins {
                distributor.add(transfer.owner.clone(), req.amount);
            }
            let distribution = distributor.run();
            for ((_, req), payout) in wins.iter_mut().zip(distribution.payouts) {
                req.amount = payout;
            }
            let events = distribution
                .shortfalls
                .into_iter()
                .map(|evt| self.next_event(ctx, EventPayload::LossSocialization(evt)))
                .collect();
            self.publish(events);
        }

        // distribute wins
        for (_, req) in &wins {
            let movement = self.run_request(state, ctx, req)?;
            movements.push(movement);
        }

        let residual = state.store.balance(&accounts.settlement)?;
        if self.verbose() {
            debug!(
                market = %market,
                expected = %expected,
                collected = %collected,
                residual = %residual,
                "settlement round done"
            );
        }
        Ok(Outcome { movements, residual })
    }
}
