pub mod builder;
pub mod signer;
pub mod utxo;
