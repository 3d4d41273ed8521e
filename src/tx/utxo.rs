use bitcoin::{Address, ScriptBuf, Txid};

use crate::{error::ChainError, node::NodeClient};

/// Smallest output value the network relays without treating it as dust.
pub const DUST_LIMIT: u64 = 546;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    /// The referenced transaction's txid.
    pub txid: Txid,
    /// The index of the referenced output in its transaction's vout.
    pub vout: u32,
    /// The value of the output, in satoshis.
    pub value: u64,
    /// The script which must be satisfied for the output to be spent.
    pub script_pubkey: ScriptBuf,
    /// The address the output is locked to.
    pub address: Address,
}

/// An observed output together with its depth in the chain.
#[derive(Clone, Debug)]
pub struct Unspent {
    pub utxo: Utxo,
    pub confirmations: u32,
}

/// Picks the first confirmed output of `address` that can fund the whole
/// parent + child fee stack. Unconfirmed outputs are never spendable here,
/// and an output too small for the chain is worse than none: it would
/// produce a parent the child cannot ride on.
pub fn find_spendable(
    node: &dyn NodeClient,
    address: &Address,
    min_confirmations: u32,
    required: u64,
) -> Result<Utxo, ChainError> {
    let unspent = node.list_unspent(address)?;

    let mut largest_confirmed: u64 = 0;
    let mut seen_confirmed = false;
    for entry in unspent {
        if entry.confirmations < min_confirmations {
            continue;
        }

        seen_confirmed = true;
        if entry.utxo.value >= required {
            debug!(
                "selected UTXO {}:{} value={} confirmations={}",
                entry.utxo.txid, entry.utxo.vout, entry.utxo.value, entry.confirmations
            );
            return Ok(entry.utxo);
        }

        largest_confirmed = largest_confirmed.max(entry.utxo.value);
    }

    if seen_confirmed {
        Err(ChainError::InsufficientFunds {
            available: largest_confirmed,
            required,
        })
    } else {
        Err(ChainError::NotFound(format!(
            "no confirmed UTXO for {}",
            address
        )))
    }
}
