// 8.5: margin and bond maintenance. top-ups and releases driven by the risk engine,
// order-time margin checks, bond moves for liquidity providers, and closing out
// distressed parties.

use super::core::Engine;
use super::requests;
use super::results::{EngineError, MarginUpdateResult};
use crate::account::AccountId;
use crate::clock::Clock;
use crate::events::EventSink;
use crate::state::LedgerState;
use crate::transfer::{LedgerMovement, Transfer, TransferType};
use crate::types::{Amount, AssetId, Context, MarketId, PartyId};
use tracing::{info_span, warn};

impl<C: Clock, S: EventSink> Engine<C, S> {
    /// Part of a MarginLow top-up that has to come out of the bond.
    fn margin_shortfall(state: &LedgerState, market: &MarketId, transfer: &Transfer) -> Amount {
        if transfer.kind != TransferType::MarginLow {
            return Amount::zero();
        }
        let bond = AccountId::bond(market, &transfer.owner, &transfer.asset);
        if !state.store.contains(&bond) {
            return Amount::zero();
        }
        let general = state
            .store
            .balance(&AccountId::general(&transfer.owner, &transfer.asset))
            .unwrap_or_default();
        transfer.amount.saturating_sub(general)
    }

    /// Applies MarginLow/MarginHigh updates. parties whose top-up moved less than
    /// `min_amount` come back as `closed`, bond users as `penalised`.
    pub fn margin_update(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        updates: &[Transfer],
    ) -> Result<MarginUpdateResult, EngineError> {
        let span = info_span!("margin_update", trace_id = %ctx.trace_id, market = %market);
        let _guard = span.enter();

        let reqs = updates
            .iter()
            .map(|t| requests::margin_request(&state.store, market, t))
            .collect::<Result<Vec<_>, _>>()?;

        let mut result = MarginUpdateResult::default();
        for (transfer, req) in updates.iter().zip(reqs.iter()) {
            let shortfall = Self::margin_shortfall(state, market, transfer);
            let movement = self.run_request(state, ctx, req)?;
            let moved = movement.total_credited();
            let status = Self::margin_status(state, market, &transfer.owner, &transfer.asset, shortfall);

            if transfer.kind == TransferType::MarginLow && moved < transfer.min_amount {
                warn!(party = %transfer.owner, moved = %moved, min_amount = %transfer.min_amount, "margin top-up below minimum, party to be closed out");
                result.closed.push(status);
            } else if !shortfall.is_zero() {
                result.penalised.push(status);
            }
            result.movements.push(movement);
        }

        self.emit_movements(ctx, &result.movements);
        Ok(result)
    }

    /// Order-time margin check. fails without moving anything when general and margin
    /// together cannot reach `min_amount`.
    pub fn margin_update_on_order(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        update: &Transfer,
    ) -> Result<MarginUpdateResult, EngineError> {
        let span = info_span!("margin_update_on_order", trace_id = %ctx.trace_id, market = %market, party = %update.owner);
        let _guard = span.enter();

        let req = requests::margin_request(&state.store, market, update)?;
        let general = state.store.balance(&AccountId::general(&update.owner, &update.asset))?;
        let margin = state.store.balance(&AccountId::margin(market, &update.owner, &update.asset))?;
        if general + margin < update.min_amount {
            return Err(EngineError::MinimumAmountNotReached {
                party: update.owner.clone(),
                min_amount: update.min_amount,
            });
        }

        let shortfall = Self::margin_shortfall(state, market, update);
        let movement = self.run_request(state, ctx, &req)?;

        let mut result = MarginUpdateResult::default();
        if !shortfall.is_zero() {
            result
                .penalised
                .push(Self::margin_status(state, market, &update.owner, &update.asset, shortfall));
        }
        result.movements.push(movement);
        self.emit_movements(ctx, &result.movements);
        Ok(result)
    }

    /// Gives back margin taken for an order that was then rejected.
    pub fn rollback_margin_update_on_order(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        transfer: &Transfer,
    ) -> Result<LedgerMovement, EngineError> {
        let span = info_span!("rollback_margin_update_on_order", trace_id = %ctx.trace_id, market = %market);
        let _guard = span.enter();

        let rollback = Transfer {
            kind: TransferType::MarginHigh,
            ..transfer.clone()
        };
        let req = requests::margin_request(&state.store, market, &rollback)?;
        let movement = self.run_request(state, ctx, &req)?;
        self.emit_movements(ctx, std::slice::from_ref(&movement));
        Ok(movement)
    }

    /// Sends the whole margin balance back to general. `None` when there was nothing to move.
    pub fn clear_party_margin_account(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        market: &MarketId,
        asset: &AssetId,
    ) -> Result<Option<LedgerMovement>, EngineError> {
        let margin = AccountId::margin(market, party, asset);
        let balance = state.store.balance(&margin)?;
        let general = AccountId::general(party, asset);
        state.store.get(&general)?;
        if balance.is_zero() {
            return Ok(None);
        }

        let req = requests::direct(margin, general, balance, asset, TransferType::MarginHigh);
        let movement = self.run_request(state, ctx, &req)?;
        self.emit_movements(ctx, std::slice::from_ref(&movement));
        Ok(Some(movement))
    }

    /// Confiscates everything distressed parties hold for the market into its insurance pool.
    /// bond and general are pulled into margin first, then the margin account is closed.
    pub fn remove_distressed(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
        parties: &[PartyId],
    ) -> Result<LedgerMovement, EngineError> {
        let span = info_span!("remove_distressed", trace_id = %ctx.trace_id, market = %market, parties = parties.len());
        let _guard = span.enter();

        let mut combined = LedgerMovement::default();
        if parties.is_empty() {
            return Ok(combined);
        }
        let accounts = requests::market_accounts(&state.store, market, asset)?;
        for party in parties {
            state.store.get(&AccountId::margin(market, party, asset))?;
            state.store.get(&AccountId::general(party, asset))?;
        }

        for party in parties {
            let margin = AccountId::margin(market, party, asset);
            let mut sources = Vec::with_capacity(2);
            let bond = AccountId::bond(market, party, asset);
            if state.store.contains(&bond) {
                sources.push(bond);
            }
            sources.push(AccountId::general(party, asset));

            for source in sources {
                let balance = state.store.balance(&source)?;
                if balance.is_zero() {
                    continue;
                }
                let req = requests::direct(source, margin.clone(), balance, asset, TransferType::MarginLow);
                combined.merge(self.run_request(state, ctx, &req)?);
            }

            let balance = state.store.balance(&margin)?;
            if !balance.is_zero() {
                let req = requests::direct(
                    margin.clone(),
                    accounts.insurance.clone(),
                    balance,
                    asset,
                    TransferType::MarginConfiscated,
                );
                combined.merge(self.run_request(state, ctx, &req)?);
            }
            warn!(party = %party, market = %market, confiscated = %balance, "distressed party removed");
            self.close_account(state, ctx, &margin);
        }

        self.emit_movements(ctx, std::slice::from_ref(&combined));
        Ok(combined)
    }

    /// BondLow / BondHigh / BondSlashing for a liquidity provider.
    pub fn bond_update(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        transfer: &Transfer,
    ) -> Result<LedgerMovement, EngineError> {
        let span = info_span!("bond_update", trace_id = %ctx.trace_id, market = %market, party = %transfer.owner);
        let _guard = span.enter();

        let req = requests::bond_request(&state.store, market, transfer)?;
        if transfer.kind == TransferType::BondLow {
            let general = AccountId::general(&transfer.owner, &transfer.asset);
            let available = state.store.balance(&general)?;
            if available < transfer.amount {
                return Err(EngineError::InsufficientFunds {
                    account: general,
                    requested: transfer.amount,
                    available,
                });
            }
        }

        let movement = self.run_request(state, ctx, &req)?;
        self.emit_movements(ctx, std::slice::from_ref(&movement));
        Ok(movement)
    }

    /// Deletes a drained bond account.
    pub fn remove_bond_account(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        market: &MarketId,
        asset: &AssetId,
    ) -> Result<(), EngineError> {
        let bond = AccountId::bond(market, party, asset);
        if !state.store.get(&bond)?.balance.is_zero() {
            return Err(EngineError::NonZeroBalance(bond));
        }
        self.close_account(state, ctx, &bond);
        Ok(())
    }
}
