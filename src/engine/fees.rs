//! Fee and reward transfers.

use super::core::Engine;
use super::requests;
use super::results::EngineError;
use crate::account::{AccountId, AccountType};
use crate::clock::Clock;
use crate::events::EventSink;
use crate::state::LedgerState;
use crate::transfer::{LedgerMovement, Transfer, TransferType};
use crate::types::{Amount, AssetId, Context, MarketId, PartyId};
use std::collections::BTreeMap;
use tracing::{debug, info_span};

impl<C: Clock, S: EventSink> Engine<C, S> {
    /// Runs maker, infrastructure and liquidity fee payments and distributions.
    pub fn transfer_fees(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
        transfers: &[Transfer],
    ) -> Result<Vec<LedgerMovement>, EngineError> {
        let span = info_span!("transfer_fees", trace_id = %ctx.trace_id, market = %market, asset = %asset);
        let _guard = span.enter();

        if transfers.is_empty() {
            return Ok(Vec::new());
        }
        let fees = requests::fee_accounts(&state.store, market, asset)?;
        let reqs = transfers
            .iter()
            .map(|t| requests::fee_request(&state.store, &fees, market, t))
            .collect::<Result<Vec<_>, _>>()?;

        let mut movements = Vec::with_capacity(reqs.len());
        for req in &reqs {
            movements.push(self.run_request(state, ctx, req)?);
        }
        self.emit_movements(ctx, &movements);
        Ok(movements)
    }

    /// Like `transfer_fees`, but first checks every payer can cover all of its fees
    /// out of general and margin.
    pub fn transfer_fees_continuous_trading(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
        transfers: &[Transfer],
    ) -> Result<Vec<LedgerMovement>, EngineError> {
        let span = info_span!(
            "transfer_fees_continuous_trading",
            trace_id = %ctx.trace_id,
            market = %market,
            asset = %asset
        );
        let _guard = span.enter();

        if transfers.is_empty() {
            return Ok(Vec::new());
        }

        let mut owed: BTreeMap<&PartyId, Amount> = BTreeMap::new();
        for transfer in transfers.iter().filter(|t| t.kind.is_fee_payment()) {
            *owed.entry(&transfer.owner).or_default() += transfer.amount;
        }

        for (party, required) in owed {
            let available = if party.is_network() {
                let insurance = AccountId::market_system(market, asset, AccountType::Insurance);
                state.store.balance(&insurance)?
            } else {
                let general = state.store.balance(&AccountId::general(party, asset))?;
                let margin = state.store.balance(&AccountId::margin(market, party, asset))?;
                general + margin
            };
            if available < required {
                if self.verbose() {
                    debug!(party = %party, required = %required, available = %available, "party cannot pay fees");
                }
                return Err(EngineError::InsufficientFundsToPayFees {
                    party: party.clone(),
                    required,
                });
            }
        }

        self.transfer_fees(state, ctx, market, asset, transfers)
    }

    /// Pays rewards out of `reward_account` into each party's general account,
    /// opening general accounts as needed.
    pub fn transfer_rewards(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        reward_account: &AccountId,
        transfers: &[Transfer],
    ) -> Result<Vec<LedgerMovement>, EngineError> {
        let span = info_span!("transfer_rewards", trace_id = %ctx.trace_id, account = %reward_account);
        let _guard = span.enter();

        if transfers.is_empty() {
            return Ok(Vec::new());
        }
        let source = state.store.get(reward_account)?;
        if !source.account_type.is_market_reward() && source.account_type != AccountType::GlobalReward {
            return Err(EngineError::InvalidAccountType(source.account_type));
        }
        for transfer in transfers {
            if transfer.kind != TransferType::RewardPayout {
                return Err(EngineError::InvalidTransferType(transfer.kind));
            }
            Self::require_asset(state, &transfer.asset)?;
        }

        for transfer in transfers {
            self.open_account(
                state,
                ctx,
                MarketId::none(),
                transfer.owner.clone(),
                transfer.asset.clone(),
                AccountType::General,
            )?;
        }

        let reqs = transfers
            .iter()
            .map(|t| requests::reward_request(&state.store, reward_account, t))
            .collect::<Result<Vec<_>, _>>()?;
        let mut movements = Vec::with_capacity(reqs.len());
        for req in &reqs {
            movements.push(self.run_request(state, ctx, req)?);
        }
        self.emit_movements(ctx, &movements);
        Ok(movements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::events::EventCollector;
    use crate::state::Asset;
    use crate::types::Timestamp;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tracing::span::{Attributes, Id};
    use tracing_subscriber::layer::{self, SubscriberExt};
    use tracing_subscriber::Layer;

    struct Setup {
        engine: Engine<ManualClock, EventCollector>,
        state: LedgerState,
        ctx: Context,
        market: MarketId,
        asset: AssetId,
    }

    fn setup() -> Setup {
        let mut engine = Engine::new(
            EngineConfig::default(),
            ManualClock::new(Timestamp::from_millis(0)),
            EventCollector::new(),
        )
        .unwrap();
        let mut state = LedgerState::new();
        let ctx = Context::new("fees", 7);
        let market = MarketId::new("m1");
        let asset = AssetId::new("USD");
        engine.enable_asset(&mut state, &ctx, Asset::new("USD", "USD", 6)).unwrap();
        engine.create_market_accounts(&mut state, &ctx, &market, &asset).unwrap();
        for (party, general, margin) in [("maker", 0u64, 0u64), ("taker", 10, 20)] {
            let party = PartyId::new(party);
            let g = engine.create_party_general_account(&mut state, &ctx, &party, &asset).unwrap();
            let m = engine.create_party_margin_account(&mut state, &ctx, &party, &market, &asset).unwrap();
            state.store.credit(&g, Amount::new(general)).unwrap();
            state.store.credit(&m, Amount::new(margin)).unwrap();
        }
        Setup {
            engine,
            state,
            ctx,
            market,
            asset,
        }
    }

    fn fee(party: &str, amount: u64, kind: TransferType) -> Transfer {
        Transfer::new(party, Amount::new(amount), "USD", kind)
    }

    #[test]
    fn fees_drain_general_then_margin() {
        let mut s = setup();
        let transfers = vec![
            fee("taker", 15, TransferType::MakerFeePay),
            fee("taker", 5, TransferType::InfrastructureFeePay),
            fee("maker", 15, TransferType::MakerFeeReceive),
        ];

        let movements = s
            .engine
            .transfer_fees(&mut s.state, &s.ctx, &s.market, &s.asset, &transfers)
            .unwrap();

        assert_eq!(movements.len(), 3);
        let taker = PartyId::new("taker");
        assert!(s.state.balance(&AccountId::general(&taker, &s.asset)).unwrap().is_zero());
        assert_eq!(s.state.balance(&AccountId::margin(&s.market, &taker, &s.asset)).unwrap(), Amount::new(10));
        assert_eq!(
            s.state.balance(&AccountId::general(&PartyId::new("maker"), &s.asset)).unwrap(),
            Amount::new(15)
        );
        let infra = AccountId::asset_system(&s.asset, AccountType::FeesInfrastructure);
        assert_eq!(s.state.balance(&infra).unwrap(), Amount::new(5));
    }

    #[test]
    fn continuous_trading_checks_total_fees_first() {
        let mut s = setup();
        let transfers = vec![
            fee("taker", 20, TransferType::MakerFeePay),
            fee("taker", 11, TransferType::LiquidityFeePay),
        ];
        let before = s.state.hash();

        let err = s
            .engine
            .transfer_fees_continuous_trading(&mut s.state, &s.ctx, &s.market, &s.asset, &transfers);

        assert!(matches!(err, Err(EngineError::InsufficientFundsToPayFees { .. })));
        assert_eq!(s.state.hash(), before);
    }

    #[derive(Clone, Default)]
    struct SpanNames(Arc<Mutex<Vec<&'static str>>>);

    impl<T: tracing::Subscriber> Layer<T> for SpanNames {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: layer::Context<'_, T>) {
            self.0.lock().push(attrs.metadata().name());
        }
    }

    #[test]
    fn fee_precheck_runs_inside_its_span() {
        let mut s = setup();
        let transfers = vec![fee("taker", 31, TransferType::MakerFeePay)];
        let names = SpanNames::default();
        let subscriber = tracing_subscriber::registry().with(names.clone());

        let err = tracing::subscriber::with_default(subscriber, || {
            s.engine
                .transfer_fees_continuous_trading(&mut s.state, &s.ctx, &s.market, &s.asset, &transfers)
        });

        assert!(matches!(err, Err(EngineError::InsufficientFundsToPayFees { .. })));
        assert_eq!(*names.0.lock(), vec!["transfer_fees_continuous_trading"]);
    }

    #[test]
    fn fees_need_market_fee_accounts() {
        let mut s = setup();
        let other = MarketId::new("nope");
        let err = s.engine.transfer_fees(
            &mut s.state,
            &s.ctx,
            &other,
            &s.asset,
            &[fee("taker", 1, TransferType::MakerFeePay)],
        );
        assert!(matches!(err, Err(EngineError::MissingFeeAccounts { .. })));
    }

    #[test]
    fn rewards_open_general_accounts() {
        let mut s = setup();
        let reward = s
            .engine
            .get_or_create_reward_account(&mut s.state, &s.ctx, &s.asset, &s.market, AccountType::MakerPaidFeeReward)
            .unwrap();
        s.state.store.credit(&reward, Amount::new(100)).unwrap();

        let transfers = vec![
            fee("newcomer", 60, TransferType::RewardPayout),
            fee("maker", 40, TransferType::RewardPayout),
        ];
        s.engine
            .transfer_rewards(&mut s.state, &s.ctx, &reward, &transfers)
            .unwrap();

        assert_eq!(
            s.state.balance(&AccountId::general(&PartyId::new("newcomer"), &s.asset)).unwrap(),
            Amount::new(60)
        );
        assert!(s.state.balance(&reward).unwrap().is_zero());

        let err = s
            .engine
            .transfer_rewards(&mut s.state, &s.ctx, &reward, &[fee("maker", 1, TransferType::Deposit)]);
        assert_eq!(err, Err(EngineError::InvalidTransferType(TransferType::Deposit)));
    }
}
