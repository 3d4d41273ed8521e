use bitcoin::{
    absolute::LockTime, script::Builder, Address, OutPoint, Sequence, Transaction, TxIn, TxOut,
    Witness,
};
use serde::Deserialize;

use crate::{
    error::ChainError,
    tx::utxo::{Utxo, DUST_LIMIT},
};

/// Sequence signalling BIP125 replaceability without a relative locktime.
pub const RBF_SEQUENCE: Sequence = Sequence::ENABLE_RBF_NO_LOCKTIME;
/// Final sequence; a transaction carrying it on every input cannot be replaced.
pub const FINAL_SEQUENCE: Sequence = Sequence::MAX;

/// Conservative vsize for any single transaction of the chain, used only to
/// derive the minimum UTXO value worth selecting.
pub const EST_CHAIN_TX_VSIZE: u64 = 250;

/// Fee rates for the three chain profiles, in sat/vB. The 1/20/50 defaults
/// mirror the usual demo numbers, but real minimum replacement fees vary
/// with relay policy, so the whole triple is configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct FeePolicy {
    #[serde(default = "default_parent_rate")]
    pub parent_rate: u64,
    #[serde(default = "default_child_rate")]
    pub child_rate: u64,
    #[serde(default = "default_replacement_rate")]
    pub replacement_rate: u64,
}

fn default_parent_rate() -> u64 {
    1
}

fn default_child_rate() -> u64 {
    20
}

fn default_replacement_rate() -> u64 {
    50
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            parent_rate: default_parent_rate(),
            child_rate: default_child_rate(),
            replacement_rate: default_replacement_rate(),
        }
    }
}

impl FeePolicy {
    /// A replacement must out-pay everything it evicts, i.e. the parent and
    /// the child together, so its rate has to clear both rates combined.
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.replacement_rate <= self.parent_rate + self.child_rate {
            return Err(ChainError::FeeTooLow {
                replacement: self.replacement_rate,
                parent: self.parent_rate,
                child: self.child_rate,
            });
        }
        Ok(())
    }

    /// Smallest UTXO value that can carry the parent + child fee stack and
    /// still leave a non-dust output at the end of the chain.
    pub fn min_spendable(&self) -> u64 {
        (self.parent_rate + self.child_rate) * EST_CHAIN_TX_VSIZE + 2 * DUST_LIMIT
    }
}

/// Assembles the three chain transactions. Pure and deterministic: identical
/// arguments always yield byte-identical unsigned transactions.
pub struct ChainTxBuilder {
    policy: FeePolicy,
}

impl ChainTxBuilder {
    pub fn new(policy: FeePolicy) -> Result<Self, ChainError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &FeePolicy {
        &self.policy
    }

    /// Wallet A's UTXO → wallet B, minimal fee, replaceable.
    pub fn parent(
        &self,
        origin: &Utxo,
        wallet_b: &Address,
        sig_cost: usize,
    ) -> Result<Transaction, ChainError> {
        self.build(origin, wallet_b, self.policy.parent_rate, RBF_SEQUENCE, sig_cost)
    }

    /// Parent's output → wallet C, standard fee, final. Spends the parent
    /// while it is still unconfirmed.
    pub fn child(
        &self,
        parent_out: &Utxo,
        wallet_c: &Address,
        sig_cost: usize,
    ) -> Result<Transaction, ChainError> {
        self.build(
            parent_out,
            wallet_c,
            self.policy.child_rate,
            FINAL_SEQUENCE,
            sig_cost,
        )
    }

    /// Same UTXO as the parent → back to wallet A, fee high enough to evict
    /// parent and child. The policy is re-checked here so a builder can never
    /// emit an under-paying replacement even if rates were mutated upstream.
    pub fn replacement(
        &self,
        origin: &Utxo,
        wallet_a: &Address,
        sig_cost: usize,
    ) -> Result<Transaction, ChainError> {
        self.policy.validate()?;
        self.build(
            origin,
            wallet_a,
            self.policy.replacement_rate,
            RBF_SEQUENCE,
            sig_cost,
        )
    }

    /// Single-input drain: everything the input carries minus the computed
    /// fee goes to `dest`. `sig_cost` is the vsize the signer will add per
    /// input; it must not be an underestimate or the signed transaction
    /// could fall below the fee it claims to pay.
    pub fn build(
        &self,
        input: &Utxo,
        dest: &Address,
        fee_rate: u64,
        sequence: Sequence,
        sig_cost: usize,
    ) -> Result<Transaction, ChainError> {
        let mut tx = Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: input.txid,
                    vout: input.vout,
                },
                script_sig: Builder::new().into_script(),
                witness: Witness::new(),
                sequence,
            }],
            output: vec![TxOut {
                value: 0,
                script_pubkey: dest.script_pubkey(),
            }],
        };

        let fee = self.fee(fee_rate, &tx, sig_cost);
        let required = fee + DUST_LIMIT;
        if input.value < required {
            return Err(ChainError::InsufficientFunds {
                available: input.value,
                required,
            });
        }

        tx.output[0].value = input.value - fee;
        Ok(tx)
    }

    /// Fee over the *signed* size: unsigned vsize plus the fixed per-input
    /// signature cost. Never below one satoshi.
    pub fn fee(&self, fee_rate: u64, unsigned: &Transaction, sig_cost: usize) -> u64 {
        let vsize = unsigned.vsize() as u64 + unsigned.input.len() as u64 * sig_cost as u64;
        (fee_rate * vsize).max(1)
    }
}
