// 8.0 engine/core.rs: main engine. owns the clock, the event sink and the live config.
// balances live in LedgerState, which the caller lends to every call.

use super::config::LiveConfig;
use super::results::{EngineError, MarginStatus};
use crate::account::{AccountId, AccountType};
use crate::clock::Clock;
use crate::config::{ConfigError, EngineConfig, LogLevel};
use crate::events::{AccountEvent, AssetEnabledEvent, Event, EventId, EventPayload, EventSink, LedgerMovementsEvent};
use crate::ledger;
use crate::state::{Asset, LedgerState};
use crate::transfer::{LedgerMovement, TransferRequest};
use crate::types::{Amount, AssetId, Context, MarketId, PartyId};
use tracing::{debug, info, info_span};

/** 8.1: main engine struct. no balances in here */
#[derive(Debug)]
pub struct Engine<C: Clock, S: EventSink> {
    pub(super) config: LiveConfig,
    pub(super) clock: C,
    pub(super) sink: S,
    pub(super) next_event_id: u64,
    // events held back while an all-or-nothing call is running
    pub(super) held: Option<Vec<Event>>,
}

impl<C: Clock, S: EventSink> Engine<C, S> {
    pub fn new(config: EngineConfig, clock: C, sink: S) -> Result<Self, ConfigError> {
        Ok(Self {
            config: LiveConfig::new(config)?,
            clock,
            sink,
            next_event_id: 1,
            held: None,
        })
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn reload_conf(&self, config: EngineConfig) -> Result<(), ConfigError> {
        info!(level = ?config.level, factor = %config.final_settlement_factor, "reloading collateral config");
        self.config.reload(config)
    }

    pub fn log_level(&self) -> LogLevel {
        self.config.level()
    }

    pub fn config(&self) -> EngineConfig {
        self.config.snapshot()
    }

    // 8.2: asset and account lifecycle

    pub fn enable_asset(&mut self, state: &mut LedgerState, ctx: &Context, asset: Asset) -> Result<(), EngineError> {
        let span = info_span!("enable_asset", trace_id = %ctx.trace_id, asset = %asset.id);
        let _guard = span.enter();

        if state.asset_exists(&asset.id) {
            return Err(EngineError::AssetAlreadyEnabled(asset.id));
        }
        let id = asset.id.clone();
        state.assets.insert(id.clone(), asset);
        self.emit(ctx, EventPayload::AssetEnabled(AssetEnabledEvent { asset: id.clone() }));

        for ty in [
            AccountType::FeesInfrastructure,
            AccountType::External,
            AccountType::GlobalReward,
            AccountType::PendingTransfers,
            AccountType::NetworkTreasury,
            AccountType::GlobalInsurance,
        ] {
            self.open_account(state, ctx, MarketId::none(), PartyId::system(), id.clone(), ty)?;
        }

        info!(asset = %id, "new asset added successfully");
        Ok(())
    }

    /// Creates the insurance, settlement, maker fee and liquidity fee accounts of a market.
    /// Returns the insurance and settlement ids.
    pub fn create_market_accounts(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: &MarketId,
        asset: &AssetId,
    ) -> Result<(AccountId, AccountId), EngineError> {
        Self::require_asset(state, asset)?;
        let mut ids = Vec::with_capacity(4);
        for ty in [
            AccountType::Insurance,
            AccountType::Settlement,
            AccountType::FeesLiquidity,
            AccountType::FeesMaker,
        ] {
            ids.push(self.open_account(state, ctx, market.clone(), PartyId::system(), asset.clone(), ty)?);
        }
        info!(market = %market, asset = %asset, "market accounts created");
        Ok((ids[0].clone(), ids[1].clone()))
    }

    pub fn create_party_general_account(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        asset: &AssetId,
    ) -> Result<AccountId, EngineError> {
        Self::require_asset(state, asset)?;
        self.open_account(state, ctx, MarketId::none(), party.clone(), asset.clone(), AccountType::General)
    }

    pub fn create_party_margin_account(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        market: &MarketId,
        asset: &AssetId,
    ) -> Result<AccountId, EngineError> {
        Self::require_asset(state, asset)?;
        self.open_account(state, ctx, market.clone(), party.clone(), asset.clone(), AccountType::Margin)
    }

    pub fn create_party_bond_account(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        market: &MarketId,
        asset: &AssetId,
    ) -> Result<AccountId, EngineError> {
        Self::require_asset(state, asset)?;
        self.open_account(state, ctx, market.clone(), party.clone(), asset.clone(), AccountType::Bond)
    }

    pub fn create_party_holding_account(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        party: &PartyId,
        asset: &AssetId,
    ) -> Result<AccountId, EngineError> {
        Self::require_asset(state, asset)?;
        self.open_account(state, ctx, MarketId::none(), party.clone(), asset.clone(), AccountType::Holding)
    }

    /// Market reward accounts are scoped to a market, the global reward account is not.
    pub fn get_or_create_reward_account(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        asset: &AssetId,
        market: &MarketId,
        account_type: AccountType,
    ) -> Result<AccountId, EngineError> {
        Self::require_asset(state, asset)?;
        let market = match account_type {
            AccountType::GlobalReward => MarketId::none(),
            ty if ty.is_market_reward() => market.clone(),
            other => return Err(EngineError::InvalidAccountType(other)),
        };
        self.open_account(state, ctx, market, PartyId::system(), asset.clone(), account_type)
    }

    /// Current balances of a party's accounts in one market.
    pub fn party_margin(&self, state: &LedgerState, market: &MarketId, party: &PartyId, asset: &AssetId) -> MarginStatus {
        Self::margin_status(state, market, party, asset, Amount::zero())
    }

    pub fn has_general_account(&self, state: &LedgerState, party: &PartyId, asset: &AssetId) -> bool {
        state.store.contains(&AccountId::general(party, asset))
    }

    // 8.3: plumbing shared by the orchestrators

    pub(super) fn require_asset(state: &LedgerState, asset: &AssetId) -> Result<(), EngineError> {
        if state.asset_exists(asset) {
            Ok(())
        } else {
            Err(EngineError::AssetNotEnabled(asset.clone()))
        }
    }

    pub(super) fn verbose(&self) -> bool {
        self.config.level().is_verbose()
    }

    /// Get or create. publishes the new account unless it is the external one.
    pub(super) fn open_account(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        market: MarketId,
        owner: PartyId,
        asset: AssetId,
        account_type: AccountType,
    ) -> Result<AccountId, EngineError> {
        let (account, created) = state.store.create(market, owner, asset, account_type)?;
        if created && !account.is_external() {
            let id = account.id.clone();
            self.emit(ctx, EventPayload::AccountUpdated(AccountEvent { account }));
            return Ok(id);
        }
        Ok(account.id)
    }

    pub(super) fn close_account(&mut self, state: &mut LedgerState, ctx: &Context, id: &AccountId) {
        if let Some(account) = state.store.remove(id) {
            if self.verbose() {
                debug!(account = %account.id, balance = %account.balance, "account removed");
            }
            self.emit(ctx, EventPayload::AccountRemoved(AccountEvent { account }));
        }
    }

    /// Runs one waterfall and publishes the balance of every touched account in mutation order.
    pub(super) fn run_request(
        &mut self,
        state: &mut LedgerState,
        ctx: &Context,
        req: &TransferRequest,
    ) -> Result<LedgerMovement, EngineError> {
        let now = self.clock.now();
        let mut changed = Vec::new();
        let movement = ledger::execute(&mut state.store, req, now, |account| {
            if !account.is_external() {
                changed.push(account.clone());
            }
        })?;

        if self.verbose() {
            debug!(
                kind = ?req.kind,
                requested = %req.amount,
                collected = %ledger::collected(&movement),
                entries = movement.entries.len(),
                "transfer executed"
            );
        }

        let events = changed
            .into_iter()
            .map(|account| self.next_event(ctx, EventPayload::AccountUpdated(AccountEvent { account })))
            .collect();
        self.publish(events);
        Ok(movement)
    }

    /// Snapshot of a party's market accounts, missing accounts read as zero.
    pub(super) fn margin_status(
        state: &LedgerState,
        market: &MarketId,
        party: &PartyId,
        asset: &AssetId,
        margin_shortfall: Amount,
    ) -> MarginStatus {
        let balance = |id: AccountId| state.store.balance(&id).unwrap_or_default();
        MarginStatus {
            party: party.clone(),
            market: market.clone(),
            asset: asset.clone(),
            margin_balance: balance(AccountId::margin(market, party, asset)),
            general_balance: balance(AccountId::general(party, asset)),
            bond_balance: state.store.balance(&AccountId::bond(market, party, asset)).ok(),
            margin_shortfall,
        }
    }

    pub(super) fn next_event(&mut self, ctx: &Context, payload: EventPayload) -> Event {
        let event = Event::new(EventId(self.next_event_id), self.clock.now(), ctx.trace_id.clone(), payload);
        self.next_event_id += 1;
        event
    }

    pub(super) fn emit(&mut self, ctx: &Context, payload: EventPayload) {
        let event = self.next_event(ctx, payload);
        match &mut self.held {
            Some(held) => held.push(event),
            None => self.sink.publish(event),
        }
    }

    /// Hands events to the sink in batches of at most `max_event_batch`.
    pub(super) fn publish(&mut self, mut events: Vec<Event>) {
        if let Some(held) = &mut self.held {
            held.extend(events);
            return;
        }
        let batch = self.config.max_event_batch();
        while !events.is_empty() {
            let rest = events.split_off(batch.min(events.len()));
            self.sink.publish_batch(events);
            events = rest;
        }
    }

    /// Runs `f` with publishing held back. the events reach the sink only if `f`
    /// succeeds, otherwise they are dropped and their ids handed out again.
    pub(super) fn all_or_nothing<T, F>(&mut self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Self) -> Result<T, EngineError>,
    {
        let first_id = self.next_event_id;
        self.held = Some(Vec::new());
        let result = f(self);
        let held = self.held.take().unwrap_or_default();
        match result {
            Ok(value) => {
                self.publish(held);
                Ok(value)
            }
            Err(err) => {
                self.next_event_id = first_id;
                Err(err)
            }
        }
    }

    pub(super) fn emit_movements(&mut self, ctx: &Context, movements: &[LedgerMovement]) {
        if movements.is_empty() {
            return;
        }
        self.emit(
            ctx,
            EventPayload::LedgerMovements(LedgerMovementsEvent {
                movements: movements.to_vec(),
            }),
        );
    }
}
