// 8.7: market close. parties get their margin and bond back in general, the market's
// system accounts are emptied into its insurance pool, and the pool is shared out
// between the other markets on the asset and the network treasury.

use super::core::Engine;
use super::requests;
use super::results::EngineError;
use crate::account::{AccountId, AccountType};
use crate::clock::Clock;
use crate::events::EventSink;
use crate::state::LedgerState;
use crate::transfer::{LedgerMovement, TransferRequest, TransferType};
use crate::types::{AssetId, Context, MarketId, PartyId};
use tracing::{info, info_span};

impl<C: Clock, S: EventSink> Engine<C, S> {
    pub fn clear_market(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
        parties: &[PartyId],
    ) -> Result<Vec<LedgerMovement>, EngineError> {
        let span = info_span!("clear_market", trace_id = %ctx.trace_id, market = %market, asset = %asset);
        let _guard = span.enter();

        let system = requests::market_accounts(&state.store, market, asset)?;
        let treasury = AccountId::asset_system(asset, AccountType::NetworkTreasury);
        if !state.store.contains(&treasury) {
            return Err(EngineError::MissingSystemAccounts {
                market: market.clone(),
                asset: asset.clone(),
            });
        }

        // 8.7.1: party accounts back into general
        let mut reqs = Vec::new();
        let mut closing = Vec::new();
        for party in parties {
            let general = AccountId::general(party, asset);
            for id in [AccountId::margin(market, party, asset), AccountId::bond(market, party, asset)] {
                let Ok(account) = state.store.get(&id) else {
                    continue;
                };
                if !state.store.contains(&general) {
                    return Err(EngineError::NoGeneralAccount {
                        party: party.clone(),
                        asset: asset.clone(),
                    });
                }
                if !account.balance.is_zero() {
                    reqs.push(requests::direct(
                        id.clone(),
                        general.clone(),
                        account.balance,
                        asset,
                        TransferType::ClearAccount,
                    ));
                }
                closing.push(id);
            }
        }

        let fees_maker = AccountId::market_system(market, asset, AccountType::FeesMaker);
        let fees_liquidity = AccountId::market_system(market, asset, AccountType::FeesLiquidity);

        let mut movements = Vec::with_capacity(reqs.len() + 4);
        for req in &reqs {
            movements.push(self.run_request(state, ctx, req)?);
        }
        for id in &closing {
            self.close_account(state, ctx, id);
        }

        // 8.7.2: market residuals into the insurance pool
        for id in [&fees_maker, &fees_liquidity, &system.settlement] {
            let balance = state.store.balance(id).unwrap_or_default();
            if balance.is_zero() {
                continue;
            }
            let req = requests::direct(id.clone(), system.insurance.clone(), balance, asset, TransferType::ClearAccount);
            movements.push(self.run_request(state, ctx, &req)?);
        }

        // 8.7.3: even split over the other pools, treasury last so it takes the remainder
        let pool = state.store.balance(&system.insurance)?;
        if !pool.is_zero() {
            let mut to: Vec<AccountId> = state
                .store
                .accounts_of_type(AccountType::Insurance)
                .filter(|acc| &acc.asset == asset && &acc.market != market)
                .map(|acc| acc.id.clone())
                .collect();
            to.push(treasury);
            let req = TransferRequest {
                from: vec![system.insurance.clone()],
                to,
                amount: pool,
                min_amount: pool,
                asset: asset.clone(),
                kind: TransferType::ClearAccount,
            };
            movements.push(self.run_request(state, ctx, &req)?);
        }

        for id in [&system.insurance, &system.settlement, &fees_maker, &fees_liquidity] {
            self.close_account(state, ctx, id);
        }

        info!(
            market = %market,
            parties = parties.len(),
            distributed = %pool,
            "market cleared"
        );
        self.emit_movements(ctx, &movements);
        Ok(movements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::events::{EventCollector, EventPayload};
    use crate::state::Asset;
    use crate::types::{Amount, Timestamp};

    fn engine() -> Engine<ManualClock, EventCollector> {
        Engine::new(
            EngineConfig::default(),
            ManualClock::new(Timestamp::from_millis(0)),
            EventCollector::new(),
        )
        .unwrap()
    }

    #[test]
    fn clearing_returns_funds_and_shares_insurance() {
        let mut engine = engine();
        let mut state = LedgerState::new();
        let ctx = Context::new("clear", 3);
        let usd = AssetId::new("USD");
        let (m1, m2, m3) = (MarketId::new("m1"), MarketId::new("m2"), MarketId::new("m3"));
        engine.enable_asset(&mut state, &ctx, Asset::new("USD", "USD", 6)).unwrap();
        let (ins1, settle1) = engine.create_market_accounts(&mut state, &ctx, &m1, &usd).unwrap();
        let (ins2, _) = engine.create_market_accounts(&mut state, &ctx, &m2, &usd).unwrap();
        let (ins3, _) = engine.create_market_accounts(&mut state, &ctx, &m3, &usd).unwrap();

        let alice = PartyId::new("alice");
        let general = engine.create_party_general_account(&mut state, &ctx, &alice, &usd).unwrap();
        let margin = engine.create_party_margin_account(&mut state, &ctx, &alice, &m1, &usd).unwrap();
        let bond = engine.create_party_bond_account(&mut state, &ctx, &alice, &m1, &usd).unwrap();
        state.store.credit(&margin, Amount::new(40)).unwrap();
        state.store.credit(&bond, Amount::new(10)).unwrap();
        state.store.credit(&ins1, Amount::new(90)).unwrap();
        state.store.credit(&settle1, Amount::new(10)).unwrap();
        let fees = AccountId::market_system(&m1, &usd, AccountType::FeesMaker);
        state.store.credit(&fees, Amount::new(1)).unwrap();
        let total = state.total_for_asset(&usd);

        engine.clear_market(&mut state, &ctx, &m1, &usd, &[alice.clone()]).unwrap();

        assert_eq!(state.balance(&general).unwrap(), Amount::new(50));
        assert!(!state.store.contains(&margin));
        assert!(!state.store.contains(&bond));
        assert!(!state.store.contains(&ins1));
        assert!(!state.store.contains(&settle1));
        assert!(!state.store.contains(&fees));

        // 101 over three pools: 33, 33 and the remainder 35 to the treasury
        assert_eq!(state.balance(&ins2).unwrap(), Amount::new(33));
        assert_eq!(state.balance(&ins3).unwrap(), Amount::new(33));
        let treasury = AccountId::asset_system(&usd, AccountType::NetworkTreasury);
        assert_eq!(state.balance(&treasury).unwrap(), Amount::new(35));
        assert_eq!(state.total_for_asset(&usd), total);

        let removed = engine
            .sink()
            .events()
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::AccountRemoved(_)))
            .count();
        assert_eq!(removed, 6);
    }

    #[test]
    fn clearing_unknown_market_fails() {
        let mut engine = engine();
        let mut state = LedgerState::new();
        let ctx = Context::new("clear", 3);
        engine.enable_asset(&mut state, &ctx, Asset::new("USD", "USD", 6)).unwrap();
        let err = engine.clear_market(&mut state, &ctx, &MarketId::new("gone"), &AssetId::new("USD"), &[]);
        assert!(matches!(err, Err(EngineError::MissingSystemAccounts { .. })));
    }

    #[test]
    fn clearing_requires_general_accounts_up_front() {
        let mut engine = engine();
        let mut state = LedgerState::new();
        let ctx = Context::new("clear", 3);
        let usd = AssetId::new("USD");
        let m1 = MarketId::new("m1");
        engine.enable_asset(&mut state, &ctx, Asset::new("USD", "USD", 6)).unwrap();
        engine.create_market_accounts(&mut state, &ctx, &m1, &usd).unwrap();
        let bob = PartyId::new("bob");
        let general = engine.create_party_general_account(&mut state, &ctx, &bob, &usd).unwrap();
        let margin = engine.create_party_margin_account(&mut state, &ctx, &bob, &m1, &usd).unwrap();
        state.store.credit(&margin, Amount::new(5)).unwrap();
        state.store.remove(&general);
        let before = state.hash();

        let err = engine.clear_market(&mut state, &ctx, &m1, &usd, &[bob]);

        assert!(matches!(err, Err(EngineError::NoGeneralAccount { .. })));
        assert_eq!(state.hash(), before);
    }
}
