//! Typed wallet notifications fanned out to channel subscribers.

use crossbeam_channel::{unbounded, Receiver, Sender};
use yupost_consensus::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeType {
    New,
    Updated,
    Deleted,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WalletEvent {
    AddressBookChanged {
        destination: String,
        label: String,
        is_mine: bool,
        purpose: String,
        change: ChangeType,
    },
    TransactionChanged {
        txid: Hash256,
        change: ChangeType,
    },
    BalanceChanged,
    WatchOnlyChanged(bool),
    DelegationChanged {
        id: Hash256,
        change: ChangeType,
    },
    SuperStakerChanged {
        id: Hash256,
        change: ChangeType,
    },
    TokenChanged {
        id: Hash256,
        change: ChangeType,
    },
    TokenTxChanged {
        id: Hash256,
        change: ChangeType,
    },
    ContractBookChanged {
        address: String,
        label: String,
        abi: String,
        change: ChangeType,
    },
    ShowProgress {
        title: String,
        percent: u8,
    },
}

/// Subscribers receive events in emission order; ones that hung up are dropped on the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Sender<WalletEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<WalletEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn emit(&mut self, event: WalletEvent) {
        if self.subscribers.is_empty() {
            return;
        }
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}
