use bitcoin::{
    ecdsa::Signature,
    script::{Builder, PushBytes},
    secp256k1::{All, Message, Secp256k1, SecretKey},
    sighash::{EcdsaSighashType, SighashCache},
    Address, Network, PrivateKey, Transaction, TxOut, Witness,
};

use crate::error::ChainError;

#[derive(Clone, Copy)]
pub enum AddressMode {
    Legacy(bool),
    Segwit,
}

impl AddressMode {
    pub fn new_from_str(v: &str) -> Self {
        match v {
            "legacy_compressed" => Self::Legacy(true),
            "legacy_uncompressed" => Self::Legacy(false),
            _ => Self::Segwit,
        }
    }

    /// Virtual bytes one signed input adds on top of its unsigned encoding,
    /// assuming the largest DER signature the signer can produce. The
    /// builder prices fees against this, so it must never underestimate.
    pub fn script_sig_cost(&self) -> usize {
        match self {
            // push + 72-byte sig/hash-type + push + 33-byte key
            AddressMode::Legacy(true) => 107,
            // push + 72-byte sig/hash-type + push + 65-byte key
            AddressMode::Legacy(false) => 139,
            // marker, flag and the two-element witness (count + 73-byte
            // sig item + 34-byte key item = 110 wu) at quarter weight,
            // rounded up
            AddressMode::Segwit => 28,
        }
    }
}

/// Single-key signer for one wallet. Stateless: signing never mutates the
/// signer, and identical input yields an identical signed transaction.
#[derive(Clone)]
pub struct PKSigner {
    secp: Secp256k1<All>,
    private_key: PrivateKey,
    address_mode: AddressMode,
    pub net: Network,
    pub address: Address,
}

impl PKSigner {
    /// Accepts the secret as raw hex (config native) or WIF.
    pub fn new_from_secret(net: Network, secret: &str, mode: AddressMode) -> anyhow::Result<Self> {
        let secp = Secp256k1::new();

        let pk = match hex::decode(secret) {
            Ok(data) => {
                let recovered_secret = SecretKey::from_slice(&data)?;
                if let AddressMode::Legacy(false) = mode {
                    PrivateKey::new_uncompressed(recovered_secret, net)
                } else {
                    PrivateKey::new(recovered_secret, net)
                }
            }
            Err(_) => PrivateKey::from_wif(secret)?,
        };

        if pk.network != net {
            anyhow::bail!(
                "key network {:?} does not match configured {:?}",
                pk.network,
                net
            );
        }

        let address = match mode {
            AddressMode::Legacy(_) => Address::p2pkh(&pk.public_key(&secp), net),
            AddressMode::Segwit => Address::p2wpkh(&pk.public_key(&secp), net)?,
        };

        Ok(Self {
            secp,
            net,
            address_mode: mode,
            private_key: pk,
            address,
        })
    }

    pub fn script_sig_cost(&self) -> usize {
        self.address_mode.script_sig_cost()
    }

    /// Signs every input of `otx`. `prevouts[i]` must be the output input `i`
    /// spends; an input not locked to this signer's address is a
    /// `Signature` error, not a silently invalid witness.
    pub fn sign_tx(&self, otx: &Transaction, prevouts: &[TxOut]) -> Result<Transaction, ChainError> {
        if prevouts.len() != otx.input.len() {
            return Err(ChainError::Signature(format!(
                "expected {} prevouts, got {}",
                otx.input.len(),
                prevouts.len()
            )));
        }

        let own_script = self.address.script_pubkey();
        for (id, prev) in prevouts.iter().enumerate() {
            if prev.script_pubkey != own_script {
                return Err(ChainError::Signature(format!(
                    "input {} is not locked to {}",
                    id, self.address
                )));
            }
        }

        match self.address_mode {
            AddressMode::Legacy(_) => self.legacy_sign_tx(otx, prevouts),
            AddressMode::Segwit => self.segwit_sign_tx(otx, prevouts),
        }
    }

    fn legacy_sign_tx(
        &self,
        otx: &Transaction,
        prevouts: &[TxOut],
    ) -> Result<Transaction, ChainError> {
        let sighash_type = EcdsaSighashType::All;
        let mut tx = otx.clone();
        let public_key = self.private_key.public_key(&self.secp).to_bytes();

        for (input_index, _input) in otx.input.iter().enumerate() {
            let sb = {
                let sighash_cache = SighashCache::new(&tx);
                let sighash = sighash_cache.legacy_signature_hash(
                    input_index,
                    &prevouts[input_index].script_pubkey,
                    sighash_type as u32,
                )?;

                let signature = self.secp.sign_ecdsa(
                    &Message::from_slice(sighash.as_ref())?,
                    &self.private_key.inner,
                );

                Signature {
                    sig: signature,
                    hash_ty: sighash_type,
                }
                .to_vec()
            };

            let payload: &PushBytes = sb
                .as_slice()
                .try_into()
                .map_err(|_| ChainError::Signature("signature exceeds push limit".to_string()))?;
            let pk_payload: &PushBytes = public_key
                .as_slice()
                .try_into()
                .map_err(|_| ChainError::Signature("public key exceeds push limit".to_string()))?;

            tx.input[input_index].script_sig = Builder::new()
                .push_slice(payload)
                .push_slice(pk_payload)
                .into_script();
            tx.input[input_index].witness.clear();
        }

        Ok(tx)
    }

    fn segwit_sign_tx(
        &self,
        otx: &Transaction,
        prevouts: &[TxOut],
    ) -> Result<Transaction, ChainError> {
        let sighash_type = EcdsaSighashType::All;
        let mut tx = otx.clone();
        let public_key = self.private_key.public_key(&self.secp);

        let mut sighash_cache = SighashCache::new(otx);
        for (input_index, _input) in otx.input.iter().enumerate() {
            let script_code = prevouts[input_index]
                .script_pubkey
                .p2wpkh_script_code()
                .ok_or_else(|| {
                    ChainError::Signature(format!("input {} is not p2wpkh", input_index))
                })?;

            let sighash = sighash_cache.segwit_signature_hash(
                input_index,
                &script_code,
                prevouts[input_index].value,
                sighash_type,
            )?;

            let signature = self.secp.sign_ecdsa(
                &Message::from_slice(sighash.as_ref())?,
                &self.private_key.inner,
            );

            let mut witness = Witness::new();
            witness.push(
                Signature {
                    sig: signature,
                    hash_ty: sighash_type,
                }
                .to_vec(),
            );
            witness.push(public_key.to_bytes());

            tx.input[input_index].witness = witness;
            tx.input[input_index].script_sig = Builder::new().into_script();
        }

        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{
        builder::{ChainTxBuilder, FeePolicy, RBF_SEQUENCE},
        utxo::Utxo,
    };
    use std::str::FromStr;

    const SECRET_A: &str = "1111111111111111111111111111111111111111111111111111111111111111";
    const SECRET_B: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    fn utxo_for(signer: &PKSigner, value: u64) -> Utxo {
        Utxo {
            txid: bitcoin::Txid::from_str(
                "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            )
            .unwrap(),
            vout: 0,
            value,
            script_pubkey: signer.address.script_pubkey(),
            address: signer.address.clone(),
        }
    }

    fn prevout(utxo: &Utxo) -> TxOut {
        TxOut {
            value: utxo.value,
            script_pubkey: utxo.script_pubkey.clone(),
        }
    }

    #[test]
    fn legacy_signing_stays_within_size_assumption() {
        let signer =
            PKSigner::new_from_secret(Network::Testnet, SECRET_A, AddressMode::Legacy(true))
                .unwrap();
        let dest =
            PKSigner::new_from_secret(Network::Testnet, SECRET_B, AddressMode::Legacy(true))
                .unwrap();

        let utxo = utxo_for(&signer, 100_000);
        let builder = ChainTxBuilder::new(FeePolicy::default()).unwrap();
        let unsigned = builder
            .build(
                &utxo,
                &dest.address,
                1,
                RBF_SEQUENCE,
                signer.script_sig_cost(),
            )
            .unwrap();

        let signed = signer.sign_tx(&unsigned, &[prevout(&utxo)]).unwrap();
        assert!(!signed.input[0].script_sig.is_empty());
        assert!(signed.vsize() <= unsigned.vsize() + signer.script_sig_cost());
        // signing must not touch anything the fee was computed from
        assert_eq!(signed.output, unsigned.output);
        assert_eq!(
            signed.input[0].previous_output,
            unsigned.input[0].previous_output
        );
    }

    #[test]
    fn segwit_signing_fills_two_witness_items() {
        let signer =
            PKSigner::new_from_secret(Network::Testnet, SECRET_A, AddressMode::Segwit).unwrap();
        let utxo = utxo_for(&signer, 100_000);
        let builder = ChainTxBuilder::new(FeePolicy::default()).unwrap();
        let unsigned = builder
            .build(
                &utxo,
                &signer.address,
                1,
                RBF_SEQUENCE,
                signer.script_sig_cost(),
            )
            .unwrap();

        let signed = signer.sign_tx(&unsigned, &[prevout(&utxo)]).unwrap();
        assert!(signed.input[0].script_sig.is_empty());
        assert_eq!(signed.input[0].witness.len(), 2);
        assert!(signed.vsize() <= unsigned.vsize() + signer.script_sig_cost());
    }

    #[test]
    fn segwit_size_assumption_covers_any_signature() {
        // signature length varies per key; the assumption must hold for
        // the largest encoding, not an average one
        let builder = ChainTxBuilder::new(FeePolicy::default()).unwrap();
        for byte in 1..=20u8 {
            let secret = hex::encode([byte; 32]);
            let signer =
                PKSigner::new_from_secret(Network::Testnet, &secret, AddressMode::Segwit).unwrap();
            let utxo = utxo_for(&signer, 100_000);
            let unsigned = builder
                .build(
                    &utxo,
                    &signer.address,
                    1,
                    RBF_SEQUENCE,
                    signer.script_sig_cost(),
                )
                .unwrap();

            let signed = signer.sign_tx(&unsigned, &[prevout(&utxo)]).unwrap();
            assert!(
                signed.vsize() <= unsigned.vsize() + signer.script_sig_cost(),
                "signed {} vB exceeds assumed {} vB",
                signed.vsize(),
                unsigned.vsize() + signer.script_sig_cost()
            );
        }
    }

    #[test]
    fn rejects_prevout_locked_to_another_key() {
        let signer =
            PKSigner::new_from_secret(Network::Testnet, SECRET_A, AddressMode::Legacy(true))
                .unwrap();
        let other =
            PKSigner::new_from_secret(Network::Testnet, SECRET_B, AddressMode::Legacy(true))
                .unwrap();

        let utxo = utxo_for(&other, 100_000);
        let builder = ChainTxBuilder::new(FeePolicy::default()).unwrap();
        let unsigned = builder
            .build(&utxo, &signer.address, 1, RBF_SEQUENCE, 107)
            .unwrap();

        let err = signer.sign_tx(&unsigned, &[prevout(&utxo)]).unwrap_err();
        assert!(matches!(err, ChainError::Signature(_)));
    }

    #[test]
    fn accepts_wif_encoded_secret() {
        let signer = PKSigner::new_from_secret(
            Network::Testnet,
            "cNGwGSc7KRrTmdLUZ54fiSXWbhLNDc2Eg5zNucgQxyQCzuQ5YRDq",
            AddressMode::Legacy(true),
        )
        .unwrap();
        assert_eq!(signer.net, Network::Testnet);
    }
}
