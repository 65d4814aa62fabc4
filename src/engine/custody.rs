// 8.6: custody. funds enter and leave the ledger through the asset's external account,
// and can be parked in a holding account while a withdrawal or transfer is pending.

use super::core::Engine;
use super::requests;
use super::results::EngineError;
use crate::account::{AccountId, AccountType};
use crate::clock::Clock;
use crate::events::EventSink;
use crate::state::LedgerState;
use crate::transfer::{LedgerMovement, Transfer, TransferType};
use crate::types::{Amount, AssetId, Context, MarketId, PartyId};
use tracing::{info, info_span};

impl<C: Clock, S: EventSink> Engine<C, S> {
    /// Credits `amount` from outside the ledger. opens the general account if needed.
    pub fn deposit(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<LedgerMovement, EngineError> {
        let span = info_span!("deposit", trace_id = %ctx.trace_id, party = %party, asset = %asset);
        let _guard = span.enter();

        Self::require_asset(state, asset)?;
        Self::require_supply_headroom(state, asset, amount)?;
        if !party.is_reward() {
            self.open_account(state, ctx, MarketId::none(), party.clone(), asset.clone(), AccountType::General)?;
        }
        let transfer = Transfer::new(party.clone(), amount, asset.clone(), TransferType::Deposit);
        let req = requests::custody_request(&state.store, &transfer)?;

        // external is conceptually unbounded: top it up so the waterfall can take the full amount
        let external = AccountId::asset_system(asset, AccountType::External);
        state.store.credit(&external, amount)?;

        let movement = self.run_request(state, ctx, &req)?;
        info!(party = %party, asset = %asset, amount = %amount, "deposit");
        self.emit_movements(ctx, std::slice::from_ref(&movement));
        Ok(movement)
    }

    pub fn withdraw(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<LedgerMovement, EngineError> {
        let span = info_span!("withdraw", trace_id = %ctx.trace_id, party = %party, asset = %asset);
        let _guard = span.enter();

        Self::require_asset(state, asset)?;
        let transfer = Transfer::new(party.clone(), amount, asset.clone(), TransferType::Withdraw);
        let req = requests::custody_request(&state.store, &transfer)?;
        Self::require_funds(state, &AccountId::general(party, asset), amount)?;

        let movement = self.run_request(state, ctx, &req)?;
        info!(party = %party, asset = %asset, amount = %amount, "withdrawal");
        self.emit_movements(ctx, std::slice::from_ref(&movement));
        Ok(movement)
    }

    /// Moves funds from general into the party's holding account, opening it on demand.
    pub fn transfer_to_holding(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<LedgerMovement, EngineError> {
        let span = info_span!("transfer_to_holding", trace_id = %ctx.trace_id, party = %party, asset = %asset);
        let _guard = span.enter();

        Self::require_asset(state, asset)?;
        Self::require_funds(state, &AccountId::general(party, asset), amount)?;
        self.open_account(state, ctx, MarketId::none(), party.clone(), asset.clone(), AccountType::Holding)?;

        let transfer = Transfer::new(party.clone(), amount, asset.clone(), TransferType::HoldingLock);
        let req = requests::holding_request(&state.store, &transfer)?;
        let movement = self.run_request(state, ctx, &req)?;
        self.emit_movements(ctx, std::slice::from_ref(&movement));
        Ok(movement)
    }

    pub fn release_from_holding(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<LedgerMovement, EngineError> {
        let span = info_span!("release_from_holding", trace_id = %ctx.trace_id, party = %party, asset = %asset);
        let _guard = span.enter();

        let transfer = Transfer::new(party.clone(), amount, asset.clone(), TransferType::HoldingRelease);
        let req = requests::holding_request(&state.store, &transfer)?;
        Self::require_funds(state, &AccountId::holding(party, asset), amount)?;

        let movement = self.run_request(state, ctx, &req)?;
        self.emit_movements(ctx, std::slice::from_ref(&movement));
        Ok(movement)
    }

    /// Every balance of an asset is bounded by its total, so capping the total keeps
    /// later credits from overflowing.
    pub(super) fn require_supply_headroom(state: &LedgerState, asset: &AssetId, amount: Amount) -> Result<(), EngineError> {
        let total = state.total_for_asset(asset);
        if total.checked_add(amount).is_none() {
            return Err(EngineError::SupplyOverflow {
                asset: asset.clone(),
                total,
                amount,
            });
        }
        Ok(())
    }

    fn require_funds(state: &LedgerState, account: &AccountId, amount: Amount) -> Result<(), EngineError> {
        let available = state.store.balance(account)?;
        if available < amount {
            return Err(EngineError::InsufficientFunds {
                account: account.clone(),
                requested: amount,
                available,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::events::EventCollector;
    use crate::state::Asset;
    use crate::types::{Timestamp, REWARD_PARTY};
    use rust_decimal::Decimal;

    fn setup() -> (Engine<ManualClock, EventCollector>, LedgerState, Context, AssetId) {
        let mut engine = Engine::new(
            EngineConfig::default(),
            ManualClock::new(Timestamp::from_millis(0)),
            EventCollector::new(),
        )
        .unwrap();
        let mut state = LedgerState::new();
        let ctx = Context::new("custody", 1);
        engine.enable_asset(&mut state, &ctx, Asset::new("BTC", "BTC", 8)).unwrap();
        (engine, state, ctx, AssetId::new("BTC"))
    }

    #[test]
    fn deposit_opens_general_and_credits() {
        let (mut engine, mut state, ctx, btc) = setup();
        let alice = PartyId::new("alice");

        let movement = engine.deposit(&mut state, &ctx, &alice, &btc, Amount::new(1_000)).unwrap();

        assert_eq!(state.balance(&AccountId::general(&alice, &btc)).unwrap(), Amount::new(1_000));
        assert_eq!(movement.entries.len(), 1);
        assert!(state.balance(&AccountId::asset_system(&btc, AccountType::External)).unwrap().is_zero());
        assert_eq!(state.total_for_asset(&btc), Amount::new(1_000));
    }

    #[test]
    fn deposit_needs_enabled_asset() {
        let (mut engine, mut state, ctx, _) = setup();
        let err = engine.deposit(&mut state, &ctx, &PartyId::new("a"), &AssetId::new("DOGE"), Amount::new(1));
        assert_eq!(err, Err(EngineError::AssetNotEnabled(AssetId::new("DOGE"))));
    }

    #[test]
    fn deposit_refuses_to_overflow_supply() {
        let (mut engine, mut state, ctx, btc) = setup();
        let half = Amount::from_decimal(Decimal::from_i128_with_scale(50_000_000_000_000_000_000_000_000_000, 0)).unwrap();
        engine.deposit(&mut state, &ctx, &PartyId::new("alice"), &btc, half).unwrap();
        let before = state.hash();
        let events = engine.sink().events().len();

        let err = engine.deposit(&mut state, &ctx, &PartyId::new("bob"), &btc, half);

        assert!(matches!(err, Err(EngineError::SupplyOverflow { .. })));
        assert_eq!(state.hash(), before);
        assert_eq!(state.total_for_asset(&btc), half);
        assert_eq!(engine.sink().events().len(), events);
        assert!(!engine.has_general_account(&state, &PartyId::new("bob"), &btc));
    }

    #[test]
    fn similar_names_keep_separate_accounts() {
        let (mut engine, mut state, ctx, btc) = setup();
        engine.enable_asset(&mut state, &ctx, Asset::new("TC", "TC", 8)).unwrap();
        let tc = AssetId::new("TC");
        let (alice, alice_b) = (PartyId::new("alice"), PartyId::new("aliceB"));

        engine.deposit(&mut state, &ctx, &alice, &btc, Amount::new(100)).unwrap();
        engine.deposit(&mut state, &ctx, &alice_b, &tc, Amount::new(50)).unwrap();

        assert_eq!(state.balance(&AccountId::general(&alice, &btc)).unwrap(), Amount::new(100));
        assert_eq!(state.balance(&AccountId::general(&alice_b, &tc)).unwrap(), Amount::new(50));
        assert_eq!(state.total_for_asset(&btc), Amount::new(100));
        assert_eq!(state.total_for_asset(&tc), Amount::new(50));
    }

    #[test]
    fn reward_party_funds_global_reward() {
        let (mut engine, mut state, ctx, btc) = setup();
        engine
            .deposit(&mut state, &ctx, &PartyId::new(REWARD_PARTY), &btc, Amount::new(77))
            .unwrap();
        let reward = AccountId::asset_system(&btc, AccountType::GlobalReward);
        assert_eq!(state.balance(&reward).unwrap(), Amount::new(77));
        assert!(!engine.has_general_account(&state, &PartyId::new(REWARD_PARTY), &btc));
    }

    #[test]
    fn withdraw_checks_general_balance() {
        let (mut engine, mut state, ctx, btc) = setup();
        let alice = PartyId::new("alice");
        engine.deposit(&mut state, &ctx, &alice, &btc, Amount::new(100)).unwrap();

        assert!(matches!(
            engine.withdraw(&mut state, &ctx, &alice, &btc, Amount::new(101)),
            Err(EngineError::InsufficientFunds { .. })
        ));
        engine.withdraw(&mut state, &ctx, &alice, &btc, Amount::new(60)).unwrap();
        assert_eq!(state.balance(&AccountId::general(&alice, &btc)).unwrap(), Amount::new(40));
        assert_eq!(state.total_for_asset(&btc), Amount::new(40));
    }

    #[test]
    fn holding_round_trip() {
        let (mut engine, mut state, ctx, btc) = setup();
        let alice = PartyId::new("alice");
        engine.deposit(&mut state, &ctx, &alice, &btc, Amount::new(100)).unwrap();

        engine.transfer_to_holding(&mut state, &ctx, &alice, &btc, Amount::new(30)).unwrap();
        assert_eq!(state.balance(&AccountId::holding(&alice, &btc)).unwrap(), Amount::new(30));
        assert_eq!(state.party_balance(&alice, &btc), Amount::new(100));

        assert!(matches!(
            engine.release_from_holding(&mut state, &ctx, &alice, &btc, Amount::new(31)),
            Err(EngineError::InsufficientFunds { .. })
        ));
        engine.release_from_holding(&mut state, &ctx, &alice, &btc, Amount::new(30)).unwrap();
        assert_eq!(state.balance(&AccountId::general(&alice, &btc)).unwrap(), Amount::new(100));
    }
}
