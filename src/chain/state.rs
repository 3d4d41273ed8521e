use std::fmt;

use bitcoin::{Transaction, Txid};

use crate::tx::utxo::Utxo;

/// Lifecycle of one chain session. `Completed` and `Replaced` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStage {
    Idle,
    ParentBroadcast,
    ChildBroadcast,
    Completed,
    Replaced,
}

impl ChainStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChainStage::Completed | ChainStage::Replaced)
    }
}

impl fmt::Display for ChainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainStage::Idle => "idle",
            ChainStage::ParentBroadcast => "parent-broadcast",
            ChainStage::ChildBroadcast => "child-broadcast",
            ChainStage::Completed => "completed",
            ChainStage::Replaced => "replaced",
        };
        f.write_str(name)
    }
}

/// Where the funds of the session currently sit. Wallet B is deliberately
/// absent: it only ever holds the parent's unconfirmed output on the way
/// to C, so it is never a resting place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FundsLocation {
    AtWalletA,
    AtWalletCUnconfirmed,
    ReturnedToWalletA,
}

impl fmt::Display for FundsLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FundsLocation::AtWalletA => "wallet A",
            FundsLocation::AtWalletCUnconfirmed => "wallet C (unconfirmed)",
            FundsLocation::ReturnedToWalletA => "returned to wallet A",
        };
        f.write_str(name)
    }
}

/// A transaction the node has accepted, kept with the txid it was
/// accepted under.
#[derive(Clone, Debug)]
pub struct RecordedTx {
    pub txid: Txid,
    pub tx: Transaction,
}

/// The whole session state. Lives only for the process lifetime: chain
/// identity is fully determined by the UTXO consumed, so there is nothing
/// to persist.
#[derive(Clone, Debug, Default)]
pub struct ChainState {
    pub stage: ChainStage,
    pub funds_at: FundsLocation,
    /// The wallet A output the parent (and any replacement) spends.
    pub origin: Option<Utxo>,
    pub parent: Option<RecordedTx>,
    pub child: Option<RecordedTx>,
    pub replacement: Option<RecordedTx>,
}

impl Default for ChainStage {
    fn default() -> Self {
        ChainStage::Idle
    }
}

impl Default for FundsLocation {
    fn default() -> Self {
        FundsLocation::AtWalletA
    }
}

/// Emitted after every state transition; the only interface a presentation
/// layer consumes.
#[derive(Clone, Debug)]
pub enum ChainEvent {
    ParentCreated { txid: Txid, funds_at: FundsLocation },
    ChildCreated { txid: Txid, funds_at: FundsLocation },
    Replaced { txid: Txid, funds_at: FundsLocation },
    Failed { reason: String, funds_at: FundsLocation },
}
