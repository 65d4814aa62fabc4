//! Collateral ledger simulation.
//!
//! Walks one market through its life: deposits, mark-to-market with and without
//! loss socialization, fees, final settlement, market close and a checkpoint
//! round trip. The per-asset total is printed after every step.

use collateral_core::*;
use std::error::Error;
use tracing_subscriber::EnvFilter;

type SimResult = Result<(), Box<dyn Error>>;

struct Sim {
    engine: Engine<ManualClock, EventCollector>,
    state: LedgerState,
    market: MarketId,
    asset: AssetId,
    block: u64,
}

impl Sim {
    fn new(config: EngineConfig) -> Result<Self, Box<dyn Error>> {
        let mut engine = Engine::new(config, ManualClock::new(Timestamp::from_millis(0)), EventCollector::new())?;
        let mut state = LedgerState::new();
        let market = MarketId::new("btc-perp");
        let asset = AssetId::new("USDT");
        let ctx = Context::new("genesis", 0);
        engine.enable_asset(&mut state, &ctx, Asset::new("USDT", "USDT", 6))?;
        engine.create_market_accounts(&mut state, &ctx, &market, &asset)?;
        Ok(Self {
            engine,
            state,
            market,
            asset,
            block: 0,
        })
    }

    fn next_ctx(&mut self, label: &str) -> Context {
        self.block += 1;
        self.engine.clock().advance(1_000);
        Context::new(format!("{label}-{}", self.block), self.block)
    }

    fn onboard(&mut self, name: &str, deposit: u64, margin: u64) -> Result<PartyId, Box<dyn Error>> {
        let party = PartyId::new(name);
        let ctx = self.next_ctx("onboard");
        self.engine
            .deposit(&mut self.state, &ctx, &party, &self.asset, Amount::new(deposit))?;
        self.engine
            .create_party_margin_account(&mut self.state, &ctx, &party, &self.market, &self.asset)?;
        if margin > 0 {
            let update = Transfer::new(party.clone(), Amount::new(margin), self.asset.clone(), TransferType::MarginLow)
                .with_min_amount(Amount::new(margin));
            self.engine
                .margin_update(&mut self.state, &ctx, &self.market, &[update])?;
        }
        Ok(party)
    }

    fn transfer(&self, party: &PartyId, amount: u64, kind: TransferType) -> Transfer {
        Transfer::new(party.clone(), Amount::new(amount), self.asset.clone(), kind)
    }

    fn print_party(&self, party: &PartyId) {
        let margin = self
            .state
            .balance(&AccountId::margin(&self.market, party, &self.asset))
            .unwrap_or_default();
        let general = self
            .state
            .balance(&AccountId::general(party, &self.asset))
            .unwrap_or_default();
        println!("  {party}: margin {margin}, general {general}");
    }

    fn print_total(&self) {
        println!(
            "  total {}: {}  hash {}\n",
            self.asset,
            self.state.total_for_asset(&self.asset),
            &self.state.hash_hex()[..16]
        );
    }
}

fn main() -> SimResult {
    let config = EngineConfig::default();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_tracing().as_str())),
        )
        .init();

    println!("Collateral Ledger Simulation");
    println!("One market, one settlement asset, full lifecycle\n");

    let mut sim = Sim::new(config)?;

    scenario_1_covered_mark_to_market(&mut sim)?;
    scenario_2_loss_socialization(&mut sim)?;
    scenario_3_fees(&mut sim)?;
    scenario_4_final_settlement_and_close(&mut sim)?;
    scenario_5_checkpoint(&sim)?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

/// Losses fully collected, wins paid in full.
fn scenario_1_covered_mark_to_market(sim: &mut Sim) -> SimResult {
    println!("Scenario 1: Covered Mark-to-Market\n");

    let alice = sim.onboard("alice", 1_000, 100)?;
    let bob = sim.onboard("bob", 1_000, 100)?;
    sim.print_total();

    let ctx = sim.next_ctx("mtm");
    let transfers = vec![
        sim.transfer(&alice, 100, TransferType::MtmLoss),
        sim.transfer(&bob, 100, TransferType::MtmWin),
    ];
    let result = sim
        .engine
        .mark_to_market(&mut sim.state, &ctx, &sim.market, &sim.asset, &transfers)?;

    println!("  Alice loses 100, Bob wins 100 ({} movements)", result.movements.len());
    sim.print_party(&alice);
    sim.print_party(&bob);
    sim.print_total();
    Ok(())
}

/// Loser cannot cover, insurance is empty, winners take a pro-rata haircut.
fn scenario_2_loss_socialization(sim: &mut Sim) -> SimResult {
    println!("Scenario 2: Loss Socialization\n");

    let carol = sim.onboard("carol", 1_600, 1_600)?;
    let dave = sim.onboard("dave", 0, 0)?;
    let erin = sim.onboard("erin", 0, 0)?;

    let ctx = sim.next_ctx("mtm");
    let transfers = vec![
        sim.transfer(&carol, 2_100, TransferType::MtmLoss),
        sim.transfer(&dave, 1_400, TransferType::MtmWin),
        sim.transfer(&erin, 700, TransferType::MtmWin),
    ];
    let isolated = carol.clone();
    sim.engine.mark_to_market_with(
        &mut sim.state,
        &ctx,
        &sim.market,
        &sim.asset,
        &transfers,
        |party| party != &isolated,
    )?;

    println!("  Carol owes 2100 from 1600 isolated margin");
    sim.print_party(&carol);
    sim.print_party(&dave);
    sim.print_party(&erin);
    for evt in sim.engine.sink().loss_socializations() {
        println!("  shortfall: {} {}", evt.party, evt.amount);
    }
    sim.print_total();
    Ok(())
}

/// Taker pays maker and infrastructure fees out of general.
fn scenario_3_fees(sim: &mut Sim) -> SimResult {
    println!("Scenario 3: Trading Fees\n");

    let (taker, maker) = (PartyId::new("alice"), PartyId::new("bob"));
    let ctx = sim.next_ctx("fees");
    let transfers = vec![
        sim.transfer(&taker, 12, TransferType::MakerFeePay),
        sim.transfer(&taker, 3, TransferType::InfrastructureFeePay),
        sim.transfer(&maker, 12, TransferType::MakerFeeReceive),
    ];
    sim.engine
        .transfer_fees_continuous_trading(&mut sim.state, &ctx, &sim.market, &sim.asset, &transfers)?;

    sim.print_party(&taker);
    sim.print_party(&maker);
    sim.print_total();
    Ok(())
}

/// Last settlement of the market, then its accounts are closed.
fn scenario_4_final_settlement_and_close(sim: &mut Sim) -> SimResult {
    println!("Scenario 4: Final Settlement and Market Close\n");

    let (alice, bob) = (PartyId::new("alice"), PartyId::new("bob"));
    let ctx = sim.next_ctx("final");
    let transfers = vec![
        sim.transfer(&bob, 50, TransferType::Loss),
        sim.transfer(&alice, 50, TransferType::Win),
    ];
    sim.engine
        .final_settlement(&mut sim.state, &ctx, &sim.market, &sim.asset, &transfers)?;

    let parties: Vec<PartyId> = ["alice", "bob", "carol", "dave", "erin"]
        .into_iter()
        .map(PartyId::new)
        .collect();
    let ctx = sim.next_ctx("close");
    let movements = sim
        .engine
        .clear_market(&mut sim.state, &ctx, &sim.market, &sim.asset, &parties)?;

    println!("  market closed with {} movements", movements.len());
    for party in &parties {
        println!("  {party}: general {}", sim.state.party_balance(party, &sim.asset));
    }
    sim.print_total();
    Ok(())
}

/// Exports a checkpoint and restores it into an empty ledger.
fn scenario_5_checkpoint(sim: &Sim) -> SimResult {
    println!("Scenario 5: Checkpoint Round Trip\n");

    let bytes = sim.engine.checkpoint(&sim.state)?;
    let mut restored = LedgerState::new();
    let mut engine = Engine::new(EngineConfig::default(), SystemClock, NullSink)?;
    engine.load_checkpoint(&mut restored, &Context::new("upgrade", sim.block + 1), &bytes)?;

    println!("  checkpoint: {} bytes", bytes.len());
    println!(
        "  original total {}, restored total {}",
        sim.state.total_for_asset(&sim.asset),
        restored.total_for_asset(&sim.asset)
    );
    Ok(())
}
