// 5.0: the waterfall. every value-moving operation in the crate ends up here.
//
// walk `from` in order, take what each account can give until the request is covered,
// spread each take evenly over `to` with the integer remainder on the last destination.
// anything still outstanding after the last source is left uncollected; callers that care
// (settlement) compare requested vs collected themselves.

use crate::account::{Account, AccountError};
use crate::store::{AccountStore, StoreError};
use crate::transfer::{LedgerEntry, LedgerMovement, PostTransferBalance, TransferRequest};
use crate::types::{Amount, Timestamp};

/// Checks every account in the request exists and that no destination can overflow,
/// whatever share of the collectable amount it ends up with. run before the first
/// mutation of a call.
pub fn validate(store: &AccountStore, req: &TransferRequest) -> Result<(), StoreError> {
    let mut available = Amount::zero();
    for id in &req.from {
        available = available + store.get(id)?.balance;
    }
    let collectable = available.min(req.amount);
    for id in &req.to {
        let account = store.get(id)?;
        if account.balance.checked_add(collectable).is_none() {
            return Err(AccountError::Overflow {
                account: id.clone(),
                balance: account.balance,
                amount: collectable,
            }
            .into());
        }
    }
    Ok(())
}

/// Runs the waterfall for one request. `on_change` sees every account right after
/// it was debited or credited, in mutation order.
pub fn execute<F>(
    store: &mut AccountStore,
    req: &TransferRequest,
    now: Timestamp,
    mut on_change: F,
) -> Result<LedgerMovement, StoreError>
where
    F: FnMut(&Account),
{
    validate(store, req)?;

    let mut movement = LedgerMovement {
        entries: Vec::new(),
        balances: req
            .to
            .iter()
            .map(|id| PostTransferBalance {
                account: id.clone(),
                balance: Amount::zero(),
            })
            .collect(),
    };
    if req.to.is_empty() {
        return Ok(movement);
    }

    let last = req.to.len() - 1;
    let mut outstanding = req.amount;

    for from in &req.from {
        if outstanding.is_zero() {
            break;
        }
        let available = store.balance(from)?;
        let take = available.min(outstanding);
        if take.is_zero() {
            continue;
        }

        let debited = store.debit(from, take)?;
        on_change(&debited);
        outstanding = outstanding.saturating_sub(take);

        let (share, remainder) = take.split(req.to.len());
        for (i, to) in req.to.iter().enumerate() {
            let amount = if i == last { share + remainder } else { share };
            if amount.is_zero() {
                continue;
            }
            let credited = store.credit(to, amount)?;
            on_change(&credited);

            movement.entries.push(LedgerEntry {
                from_account: from.clone(),
                to_account: to.clone(),
                amount,
                kind: req.kind,
                timestamp: now,
                from_account_balance: debited.balance,
                to_account_balance: credited.balance,
            });
            movement.balances[i].balance += amount;
        }
    }

    Ok(movement)
}

/// Amount actually collected by a movement (what landed in the destinations).
pub fn collected(movement: &LedgerMovement) -> Amount {
    movement.total_credited()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{AccountId, AccountType};
    use crate::transfer::TransferType;
    use crate::types::{AssetId, MarketId, PartyId};

    fn asset() -> AssetId {
        AssetId::new("ETH")
    }

    fn general(store: &mut AccountStore, party: &str, balance: u64) -> AccountId {
        let (acc, _) = store
            .create(MarketId::none(), PartyId::new(party), asset(), AccountType::General)
            .unwrap();
        store.credit(&acc.id, Amount::new(balance)).unwrap();
        acc.id
    }

    fn request(from: Vec<AccountId>, to: Vec<AccountId>, amount: u64) -> TransferRequest {
        TransferRequest {
            from,
            to,
            amount: Amount::new(amount),
            min_amount: Amount::zero(),
            asset: asset(),
            kind: TransferType::ClearAccount,
        }
    }

    #[test]
    fn first_source_covers_everything() {
        let mut store = AccountStore::new();
        let a = general(&mut store, "a", 100);
        let b = general(&mut store, "b", 100);
        let dst = general(&mut store, "dst", 0);

        let mv = execute(&mut store, &request(vec![a.clone(), b.clone()], vec![dst.clone()], 60), Timestamp::from_millis(1), |_| {}).unwrap();

        assert_eq!(store.balance(&a).unwrap(), Amount::new(40));
        assert_eq!(store.balance(&b).unwrap(), Amount::new(100));
        assert_eq!(store.balance(&dst).unwrap(), Amount::new(60));
        assert_eq!(mv.entries.len(), 1);
        assert_eq!(mv.entries[0].from_account_balance, Amount::new(40));
        assert_eq!(mv.entries[0].to_account_balance, Amount::new(60));
        assert!(mv.is_balanced());
    }

    #[test]
    fn waterfall_drains_in_order() {
        let mut store = AccountStore::new();
        let a = general(&mut store, "a", 30);
        let b = general(&mut store, "b", 50);
        let dst = general(&mut store, "dst", 0);

        let mv = execute(&mut store, &request(vec![a.clone(), b.clone()], vec![dst.clone()], 60), Timestamp::from_millis(1), |_| {}).unwrap();

        assert!(store.balance(&a).unwrap().is_zero());
        assert_eq!(store.balance(&b).unwrap(), Amount::new(20));
        assert_eq!(mv.credited_to(&dst), Amount::new(60));
        assert_eq!(mv.entries.len(), 2);
    }

    #[test]
    fn shortfall_is_left_uncollected() {
        let mut store = AccountStore::new();
        let a = general(&mut store, "a", 30);
        let dst = general(&mut store, "dst", 0);

        let mv = execute(&mut store, &request(vec![a.clone()], vec![dst.clone()], 100), Timestamp::from_millis(1), |_| {}).unwrap();

        assert_eq!(collected(&mv), Amount::new(30));
        assert!(store.balance(&a).unwrap().is_zero());
    }

    #[test]
    fn remainder_goes_to_last_destination() {
        let mut store = AccountStore::new();
        let src = general(&mut store, "src", 100);
        let d1 = general(&mut store, "d1", 0);
        let d2 = general(&mut store, "d2", 0);
        let d3 = general(&mut store, "d3", 0);

        execute(&mut store, &request(vec![src], vec![d1.clone(), d2.clone(), d3.clone()], 10), Timestamp::from_millis(1), |_| {}).unwrap();

        assert_eq!(store.balance(&d1).unwrap(), Amount::new(3));
        assert_eq!(store.balance(&d2).unwrap(), Amount::new(3));
        assert_eq!(store.balance(&d3).unwrap(), Amount::new(4));
    }

    #[test]
    fn partial_take_keeps_remainder_too() {
        let mut store = AccountStore::new();
        let a = general(&mut store, "a", 5);
        let b = general(&mut store, "b", 100);
        let d1 = general(&mut store, "d1", 0);
        let d2 = general(&mut store, "d2", 0);

        let mv = execute(&mut store, &request(vec![a, b], vec![d1.clone(), d2.clone()], 9), Timestamp::from_millis(1), |_| {}).unwrap();

        // 5 -> (2, 3), then 4 -> (2, 2)
        assert_eq!(store.balance(&d1).unwrap(), Amount::new(4));
        assert_eq!(store.balance(&d2).unwrap(), Amount::new(5));
        assert_eq!(mv.total_debited(), Amount::new(9));
    }

    #[test]
    fn unknown_account_fails_before_any_change() {
        let mut store = AccountStore::new();
        let a = general(&mut store, "a", 50);
        let ghost = AccountId::general(&PartyId::new("ghost"), &asset());

        let err = execute(&mut store, &request(vec![a.clone()], vec![ghost], 10), Timestamp::from_millis(1), |_| {});
        assert!(matches!(err, Err(StoreError::AccountNotFound(_))));
        assert_eq!(store.balance(&a).unwrap(), Amount::new(50));
    }

    #[test]
    fn overflowing_destination_fails_before_any_change() {
        let mut store = AccountStore::new();
        let a = general(&mut store, "a", 50);
        let ok = general(&mut store, "ok", 0);
        let full = general(&mut store, "full", 0);
        store.credit(&full, Amount::MAX.saturating_sub(Amount::new(10))).unwrap();

        let err = execute(&mut store, &request(vec![a.clone()], vec![ok.clone(), full.clone()], 40), Timestamp::from_millis(1), |_| {});

        assert!(matches!(err, Err(StoreError::Account(AccountError::Overflow { .. }))));
        assert_eq!(store.balance(&a).unwrap(), Amount::new(50));
        assert!(store.balance(&ok).unwrap().is_zero());

        // headroom is judged on what the sources can give, not the face amount
        let b = general(&mut store, "b", 10);
        execute(&mut store, &request(vec![b], vec![full.clone()], 1_000), Timestamp::from_millis(1), |_| {}).unwrap();
        assert_eq!(store.balance(&full).unwrap(), Amount::MAX);
    }

    #[test]
    fn change_callback_sees_mutation_order() {
        let mut store = AccountStore::new();
        let a = general(&mut store, "a", 10);
        let dst = general(&mut store, "dst", 0);
        let mut seen = Vec::new();

        execute(&mut store, &request(vec![a.clone()], vec![dst.clone()], 10), Timestamp::from_millis(1), |acc| seen.push((acc.id.clone(), acc.balance))).unwrap();

        assert_eq!(seen, vec![(a, Amount::zero()), (dst, Amount::new(10))]);
    }
}
