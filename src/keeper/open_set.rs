// 10.2: accounts with a live position, rebuilt purely from the ledger's event log.

use crate::events::Event;
use crate::types::AccountId;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenSet {
    accounts: BTreeSet<AccountId>,
    // seq of the last event folded in
    cursor: u64,
}

impl OpenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replay(events: &[Event]) -> Self {
        let mut set = Self::new();
        set.apply_all(events);
        set
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Folds one event in. Events at or below the cursor were already seen and are ignored.
    pub fn apply(&mut self, event: &Event) -> bool {
        if event.seq <= self.cursor {
            return false;
        }
        let account = event.payload.account_id();
        if event.payload.leaves_position_open() {
            self.accounts.insert(account);
        } else {
            self.accounts.remove(&account);
        }
        self.cursor = event.seq;
        true
    }

    pub fn apply_all(&mut self, events: &[Event]) -> usize {
        events.iter().filter(|e| self.apply(e)).count()
    }

    pub fn contains(&self, account: AccountId) -> bool {
        self.accounts.contains(&account)
    }

    // the ledger said the position is gone before the log caught up
    pub fn remove(&mut self, account: AccountId) -> bool {
        self.accounts.remove(&account)
    }

    pub fn iter(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.accounts.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventPayload, LiquidatedEvent, PositionOpenedEvent, StopsUpdatedEvent};
    use crate::types::{Amount, Leverage, Price, Side, Timestamp};

    fn event(seq: u64, payload: EventPayload) -> Event {
        Event {
            seq,
            timestamp: Timestamp::from_secs(seq as i64),
            payload,
        }
    }

    fn opened(account: u64) -> EventPayload {
        EventPayload::PositionOpened(PositionOpenedEvent {
            account_id: AccountId(account),
            side: Side::Long,
            leverage: Leverage::new(2).unwrap(),
            deposit: Amount::new(100),
            fee: Amount::zero(),
            margin: Amount::new(100),
            entry_price: Price::from_units(10),
        })
    }

    fn liquidated(account: u64) -> EventPayload {
        EventPayload::Liquidated(LiquidatedEvent {
            account_id: AccountId(account),
            liquidator: AccountId(0),
            exit_price: Price::from_units(5),
            equity: Amount::zero(),
            reward: Amount::zero(),
            retained: Amount::zero(),
        })
    }

    #[test]
    fn replay_tracks_opens_and_exits() {
        let events = vec![
            event(1, opened(1)),
            event(2, opened(2)),
            event(3, liquidated(1)),
            event(4, opened(3)),
        ];
        let set = OpenSet::replay(&events);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![AccountId(2), AccountId(3)]);
        assert_eq!(set.cursor(), 4);
    }

    #[test]
    fn replaying_twice_changes_nothing() {
        let events = vec![event(1, opened(1)), event(2, liquidated(1))];
        let mut set = OpenSet::replay(&events);
        assert_eq!(set.apply_all(&events), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn stops_update_marks_open() {
        let events = vec![event(
            1,
            EventPayload::StopsUpdated(StopsUpdatedEvent {
                account_id: AccountId(5),
                stop_loss: None,
                take_profit: None,
            }),
        )];
        assert!(OpenSet::replay(&events).contains(AccountId(5)));
    }
}
