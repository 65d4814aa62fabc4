//! Loss socialization.
//!
//! When the losses of a settlement round could not all be collected, the winners share
//! the shortfall in proportion to what they were owed. Each payout becomes
//! `floor(requested * collected / expected)` and the rounding residual is handed back
//! so the payouts add up to exactly `collected`.

use crate::events::LossSocializationEvent;
use crate::types::{Amount, MarketId, PartyId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinRequest {
    pub party: PartyId,
    pub requested: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Distribution {
    /// Payout per request, same order as added.
    pub payouts: Vec<Amount>,
    pub shortfalls: Vec<LossSocializationEvent>,
}

impl Distribution {
    pub fn total(&self) -> Amount {
        self.payouts.iter().sum()
    }
}

#[derive(Debug, Clone)]
pub struct LossDistributor {
    market: MarketId,
    expected: Amount,
    collected: Amount,
    requests: Vec<WinRequest>,
}

impl LossDistributor {
    pub fn new(market: MarketId, expected: Amount, collected: Amount) -> Self {
        Self {
            market,
            expected,
            collected,
            requests: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.collected < self.expected
    }

    pub fn add(&mut self, party: PartyId, requested: Amount) {
        self.requests.push(WinRequest { party, requested });
    }

    pub fn requests(&self) -> &[WinRequest] {
        &self.requests
    }

    pub fn run(&self) -> Distribution {
        if !self.is_active() {
            return Distribution {
                payouts: self.requests.iter().map(|r| r.requested).collect(),
                shortfalls: Vec::new(),
            };
        }

        let mut payouts: Vec<Amount> = self
            .requests
            .iter()
            .map(|r| r.requested.mul_div_floor(self.collected, self.expected))
            .collect();

        let distributed: Amount = payouts.iter().sum();
        let mut residual = self.collected.saturating_sub(distributed);

        // the network party soaks up the residual when it is owed something, otherwise
        // the last win does. spills backwards so nobody ends up above what they asked for.
        let mut order: Vec<usize> = (0..self.requests.len()).rev().collect();
        if let Some(pos) = order.iter().position(|&i| self.requests[i].party.is_network()) {
            let network = order.remove(pos);
            order.insert(0, network);
        }
        for i in order {
            if residual.is_zero() {
                break;
            }
            let room = self.requests[i].requested.saturating_sub(payouts[i]);
            let topup = room.min(residual);
            payouts[i] += topup;
            residual = residual.saturating_sub(topup);
        }

        let shortfalls = self
            .requests
            .iter()
            .zip(payouts.iter())
            .filter(|(r, paid)| !r.party.is_network() && **paid < r.requested)
            .map(|(r, paid)| LossSocializationEvent {
                market: self.market.clone(),
                party: r.party.clone(),
                amount: r.requested.saturating_sub(*paid),
            })
            .collect();

        Distribution { payouts, shortfalls }
    }
}
