use std::sync::Arc;

use bitcoin::{Address, Transaction, Txid};
use bitcoincore_rpc::{jsonrpc, Auth, Client, RpcApi};

use crate::{
    config::BTCConfig,
    error::ChainError,
    tx::utxo::{Unspent, Utxo},
};

/// The full node surface the chain needs. Anything that can answer these
/// four calls can stand in for the RPC client; the tests drive the
/// orchestrator through an in-process implementation.
pub trait NodeClient {
    fn list_unspent(&self, address: &Address) -> Result<Vec<Unspent>, ChainError>;
    fn broadcast(&self, tx: &Transaction) -> Result<Txid, ChainError>;
    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError>;
    fn tx_confirmations(&self, txid: &Txid) -> Result<u32, ChainError>;
}

// a shared handle to a node is itself a node
impl<T: NodeClient> NodeClient for Arc<T> {
    fn list_unspent(&self, address: &Address) -> Result<Vec<Unspent>, ChainError> {
        (**self).list_unspent(address)
    }

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, ChainError> {
        (**self).broadcast(tx)
    }

    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        (**self).get_transaction(txid)
    }

    fn tx_confirmations(&self, txid: &Txid) -> Result<u32, ChainError> {
        (**self).tx_confirmations(txid)
    }
}

pub struct CoreRpcClient {
    rpc: Client,
}

impl CoreRpcClient {
    pub fn new(cfg: &BTCConfig) -> Result<Self, ChainError> {
        let rpc = Client::new(
            &cfg.address,
            Auth::UserPass(cfg.rpc_user.clone(), cfg.rpc_password.clone()),
        )
        .map_err(connection_error)?;

        Ok(Self { rpc })
    }
}

impl NodeClient for CoreRpcClient {
    fn list_unspent(&self, address: &Address) -> Result<Vec<Unspent>, ChainError> {
        // confirmation filtering happens in the resolver, not the node
        let entries = self
            .rpc
            .list_unspent(Some(0), None, Some(&[address]), Some(true), None)
            .map_err(connection_error)?;

        let mut result = Vec::with_capacity(entries.len());
        for e in entries {
            result.push(Unspent {
                confirmations: e.confirmations,
                utxo: Utxo {
                    txid: e.txid,
                    vout: e.vout,
                    value: e.amount.to_sat(),
                    script_pubkey: e.script_pub_key,
                    address: address.clone(),
                },
            });
        }
        Ok(result)
    }

    fn broadcast(&self, tx: &Transaction) -> Result<Txid, ChainError> {
        self.rpc.send_raw_transaction(tx).map_err(broadcast_error)
    }

    fn get_transaction(&self, txid: &Txid) -> Result<Transaction, ChainError> {
        match self.rpc.get_raw_transaction(txid, None) {
            Ok(tx) => Ok(tx),
            Err(err) => match connection_error(err) {
                ChainError::Node(msg) => Err(ChainError::NotFound(msg)),
                other => Err(other),
            },
        }
    }

    fn tx_confirmations(&self, txid: &Txid) -> Result<u32, ChainError> {
        let info = self
            .rpc
            .get_raw_transaction_info(txid, None)
            .map_err(connection_error)?;
        Ok(info.confirmations.unwrap_or(0))
    }
}

fn connection_error(err: bitcoincore_rpc::Error) -> ChainError {
    match err {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(e)) => {
            ChainError::Node(format!("{} (code {})", e.message, e.code))
        }
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Transport(e)) => {
            ChainError::Connection(e.to_string())
        }
        other => ChainError::Connection(other.to_string()),
    }
}

fn broadcast_error(err: bitcoincore_rpc::Error) -> ChainError {
    match err {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(e)) => classify_reject(&e),
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Transport(e)) => {
            ChainError::Connection(e.to_string())
        }
        other => ChainError::Connection(other.to_string()),
    }
}

/// Sorts a sendrawtransaction rejection into the taxonomy. Core's reject
/// strings are stable enough to match on; anything unrecognized passes
/// through verbatim.
fn classify_reject(err: &jsonrpc::error::RpcError) -> ChainError {
    let message = err.message.as_str();

    if message.contains("rejecting replacement")
        || message.contains("too many potential replacements")
        || message.contains("replacement-adds-unconfirmed")
    {
        ChainError::RejectedDoubleSpend(err.message.clone())
    } else if message.contains("txn-mempool-conflict") || message.contains("conflict") {
        ChainError::RejectedConflict(err.message.clone())
    } else if message.contains("min relay fee not met")
        || message.contains("mempool min fee not met")
    {
        ChainError::RejectedLowFee(err.message.clone())
    } else if message.contains("missingorspent") {
        ChainError::NotFound(err.message.clone())
    } else {
        let detail =
            serde_json::to_string(err).unwrap_or_else(|_| err.message.clone());
        ChainError::Node(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_err(message: &str) -> jsonrpc::error::RpcError {
        jsonrpc::error::RpcError {
            code: -26,
            message: message.to_string(),
            data: None,
        }
    }

    #[test]
    fn classifies_low_fee_rejects() {
        let err = classify_reject(&rpc_err("min relay fee not met, 100 < 141"));
        assert!(matches!(err, ChainError::RejectedLowFee(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn classifies_replacement_rejects() {
        let err = classify_reject(&rpc_err(
            "insufficient fee, rejecting replacement 1a2b3c; new feerate 0.00001 <= old feerate 0.00002",
        ));
        assert!(matches!(err, ChainError::RejectedDoubleSpend(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn classifies_mempool_conflicts() {
        let err = classify_reject(&rpc_err("txn-mempool-conflict"));
        assert!(matches!(err, ChainError::RejectedConflict(_)));
    }

    #[test]
    fn unknown_rejects_pass_through() {
        let err = classify_reject(&rpc_err("scriptpubkey"));
        assert!(matches!(err, ChainError::Node(_)));
    }
}
