mod state;

pub use state::{ChainEvent, ChainStage, ChainState, FundsLocation, RecordedTx};

use std::sync::RwLock;

use bitcoin::{Address, Txid, TxOut};

use crate::{
    error::ChainError,
    node::NodeClient,
    tx::{
        builder::ChainTxBuilder,
        signer::PKSigner,
        utxo::{self, Utxo},
    },
};

/// The three wallets of a session. Pure key/address material; the chain
/// never generates or persists keys.
pub struct Wallets {
    /// Origin. Signs the parent and the replacement.
    pub signer_a: PKSigner,
    /// Intermediate. Receives the parent output and signs the child.
    pub signer_b: PKSigner,
    /// Final recipient. Address only, never signs.
    pub wallet_c: Address,
}

pub type EventSink = Box<dyn Fn(&ChainEvent) + Send + Sync>;

/// Sequential protocol driver for one transaction chain. All operations run
/// under one exclusive writer over the session state, so no two broadcasts
/// for the same UTXO can ever be in flight at once; `funds_at` reads stay
/// concurrent. State advances only after the node has returned a txid.
pub struct ChainOrchestrator<C: NodeClient> {
    node: C,
    wallets: Wallets,
    builder: ChainTxBuilder,
    min_confirmations: u32,
    state: RwLock<ChainState>,
    sinks: Vec<EventSink>,
}

impl<C: NodeClient> ChainOrchestrator<C> {
    pub fn new(node: C, wallets: Wallets, builder: ChainTxBuilder, min_confirmations: u32) -> Self {
        Self {
            node,
            wallets,
            builder,
            min_confirmations,
            state: RwLock::new(ChainState::default()),
            sinks: Vec::new(),
        }
    }

    /// Rebuilds a session around an already-broadcast parent so the kill
    /// switch works from a fresh process. The origin UTXO is recovered from
    /// the parent's first input and must be locked to wallet A.
    pub fn resume(
        node: C,
        wallets: Wallets,
        builder: ChainTxBuilder,
        min_confirmations: u32,
        parent_txid: Txid,
    ) -> Result<Self, ChainError> {
        let parent_tx = node.get_transaction(&parent_txid)?;
        let outpoint = parent_tx
            .input
            .first()
            .map(|i| i.previous_output)
            .ok_or_else(|| ChainError::Node(format!("parent {} has no inputs", parent_txid)))?;

        let funding = node.get_transaction(&outpoint.txid)?;
        let prev = funding.output.get(outpoint.vout as usize).ok_or_else(|| {
            ChainError::NotFound(format!(
                "output {}:{} does not exist",
                outpoint.txid, outpoint.vout
            ))
        })?;

        if prev.script_pubkey != wallets.signer_a.address.script_pubkey() {
            return Err(ChainError::Signature(format!(
                "parent input is not locked to wallet A ({})",
                wallets.signer_a.address
            )));
        }

        let origin = Utxo {
            txid: outpoint.txid,
            vout: outpoint.vout,
            value: prev.value,
            script_pubkey: prev.script_pubkey.clone(),
            address: wallets.signer_a.address.clone(),
        };

        info!(
            "resumed chain: parent={} origin={}:{} value={}",
            parent_txid, origin.txid, origin.vout, origin.value
        );

        let orchestrator = Self::new(node, wallets, builder, min_confirmations);
        {
            let mut state = orchestrator.state.write().unwrap();
            state.origin = Some(origin);
            state.parent = Some(RecordedTx {
                txid: parent_txid,
                tx: parent_tx,
            });
            state.stage = ChainStage::ParentBroadcast;
        }
        Ok(orchestrator)
    }

    pub fn subscribe(&mut self, sink: EventSink) {
        self.sinks.push(sink);
    }

    pub fn funds_at(&self) -> FundsLocation {
        self.state.read().unwrap().funds_at
    }

    pub fn state(&self) -> ChainState {
        self.state.read().unwrap().clone()
    }

    /// Idle → ParentBroadcast. Spends a confirmed wallet A UTXO to wallet B
    /// with the minimal, RBF-signalling parent profile.
    pub fn create_parent(&self) -> Result<Txid, ChainError> {
        let mut state = self.state.write().unwrap();
        if state.stage != ChainStage::Idle {
            let err = ChainError::InvalidChainState {
                op: "create-parent",
                stage: state.stage,
            };
            let funds_at = state.funds_at;
            drop(state);
            return Err(self.fail(funds_at, err));
        }

        match self.broadcast_parent() {
            Ok((origin, recorded)) => {
                let txid = recorded.txid;
                state.origin = Some(origin);
                state.parent = Some(recorded);
                state.stage = ChainStage::ParentBroadcast;
                // funds only count as moved once the child rides on top
                let funds_at = state.funds_at;
                drop(state);
                self.emit(&ChainEvent::ParentCreated { txid, funds_at });
                Ok(txid)
            }
            Err(err) => {
                let funds_at = state.funds_at;
                drop(state);
                Err(self.fail(funds_at, err))
            }
        }
    }

    /// ParentBroadcast → ChildBroadcast. Spends the parent's output while
    /// the parent is still unconfirmed; that mempool ancestry is the point
    /// of the exercise, not an oversight.
    pub fn create_child(&self) -> Result<Txid, ChainError> {
        let mut state = self.state.write().unwrap();
        let parent = match (&state.stage, &state.parent) {
            (ChainStage::ParentBroadcast, Some(parent)) => parent.clone(),
            _ => {
                let err = ChainError::InvalidChainState {
                    op: "create-child",
                    stage: state.stage,
                };
                let funds_at = state.funds_at;
                drop(state);
                return Err(self.fail(funds_at, err));
            }
        };

        match self.broadcast_child(&parent) {
            Ok(recorded) => {
                let txid = recorded.txid;
                state.child = Some(recorded);
                state.stage = ChainStage::ChildBroadcast;
                state.funds_at = FundsLocation::AtWalletCUnconfirmed;
                let funds_at = state.funds_at;
                drop(state);
                self.emit(&ChainEvent::ChildCreated { txid, funds_at });
                Ok(txid)
            }
            Err(err) => {
                let funds_at = state.funds_at;
                drop(state);
                Err(self.fail(funds_at, err))
            }
        }
    }

    /// The kill switch ("stop all" is the same operation). Re-spends the
    /// parent's exact input with the replacement profile; once the node
    /// accepts it, every BIP125-enforcing mempool drops parent and child
    /// and the funds are back at wallet A. Refused without touching the
    /// network when the session is already terminal.
    pub fn replace_parent(&self) -> Result<Txid, ChainError> {
        let mut state = self.state.write().unwrap();
        let origin = match (&state.stage, &state.origin) {
            (ChainStage::ParentBroadcast | ChainStage::ChildBroadcast, Some(origin)) => {
                origin.clone()
            }
            _ => {
                let err = ChainError::InvalidChainState {
                    op: "replace-parent",
                    stage: state.stage,
                };
                let funds_at = state.funds_at;
                drop(state);
                return Err(self.fail(funds_at, err));
            }
        };

        match self.broadcast_replacement(&origin) {
            Ok(recorded) => {
                let txid = recorded.txid;
                state.replacement = Some(recorded);
                state.stage = ChainStage::Replaced;
                state.funds_at = FundsLocation::ReturnedToWalletA;
                let funds_at = state.funds_at;
                drop(state);
                self.emit(&ChainEvent::Replaced { txid, funds_at });
                Ok(txid)
            }
            Err(err) => {
                let funds_at = state.funds_at;
                drop(state);
                Err(self.fail(funds_at, err))
            }
        }
    }

    /// Polls the child transaction; flips the chain to Completed once it
    /// has confirmed. Past that point only the blockchain itself can move
    /// the funds again.
    pub fn refresh(&self) -> Result<ChainStage, ChainError> {
        let mut state = self.state.write().unwrap();
        let child_txid = match (&state.stage, &state.child) {
            (ChainStage::ChildBroadcast, Some(child)) => child.txid,
            _ => return Ok(state.stage),
        };

        let confirmations = self.node.tx_confirmations(&child_txid)?;
        if confirmations >= self.min_confirmations {
            state.stage = ChainStage::Completed;
            info!(
                "child {} confirmed ({} confirmations), chain completed",
                child_txid, confirmations
            );
        }
        Ok(state.stage)
    }

    fn broadcast_parent(&self) -> Result<(Utxo, RecordedTx), ChainError> {
        let required = self.builder.policy().min_spendable();
        let origin = utxo::find_spendable(
            &self.node,
            &self.wallets.signer_a.address,
            self.min_confirmations,
            required,
        )?;
        info!(
            "selected origin UTXO {}:{} value={}",
            origin.txid, origin.vout, origin.value
        );

        let unsigned = self.builder.parent(
            &origin,
            &self.wallets.signer_b.address,
            self.wallets.signer_a.script_sig_cost(),
        )?;
        let signed = self.wallets.signer_a.sign_tx(&unsigned, &[prevout(&origin)])?;
        let txid = self.node.broadcast(&signed)?;
        info!("parent broadcast: txid={}", txid);

        Ok((origin, RecordedTx { txid, tx: signed }))
    }

    fn broadcast_child(&self, parent: &RecordedTx) -> Result<RecordedTx, ChainError> {
        // the chain always pays wallet B through the parent's first output
        let parent_out = Utxo {
            txid: parent.txid,
            vout: 0,
            value: parent.tx.output[0].value,
            script_pubkey: parent.tx.output[0].script_pubkey.clone(),
            address: self.wallets.signer_b.address.clone(),
        };

        let unsigned = self.builder.child(
            &parent_out,
            &self.wallets.wallet_c,
            self.wallets.signer_b.script_sig_cost(),
        )?;
        let signed = self
            .wallets
            .signer_b
            .sign_tx(&unsigned, &[prevout(&parent_out)])?;
        let txid = self.node.broadcast(&signed)?;
        info!("child broadcast: txid={} (parent unconfirmed)", txid);

        Ok(RecordedTx { txid, tx: signed })
    }

    fn broadcast_replacement(&self, origin: &Utxo) -> Result<RecordedTx, ChainError> {
        let unsigned = self.builder.replacement(
            origin,
            &self.wallets.signer_a.address,
            self.wallets.signer_a.script_sig_cost(),
        )?;
        let signed = self.wallets.signer_a.sign_tx(&unsigned, &[prevout(origin)])?;
        let txid = self.node.broadcast(&signed)?;
        info!("replacement broadcast: txid={}", txid);

        Ok(RecordedTx { txid, tx: signed })
    }

    fn fail(&self, funds_at: FundsLocation, err: ChainError) -> ChainError {
        error!("chain operation failed: {}", err);
        self.emit(&ChainEvent::Failed {
            reason: err.to_string(),
            funds_at,
        });
        err
    }

    // never called with the state lock held: a sink may read the session
    // back through `funds_at` or `state`
    fn emit(&self, event: &ChainEvent) {
        for sink in self.sinks.iter() {
            sink(event);
        }
    }
}

fn prevout(utxo: &Utxo) -> TxOut {
    TxOut {
        value: utxo.value,
        script_pubkey: utxo.script_pubkey.clone(),
    }
}
