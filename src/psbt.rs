// Descriptor wallet library extending bitcoin & miniscript functionality
// by LNP/BP Association (https://lnp-bp.org)
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the Apache-2.0 License
// along with this software.
// If not, see <https://opensource.org/licenses/Apache-2.0>.

//! PSBT integration: populating inputs from descriptor knowledge and
//! finalizing them once partial signatures have been collected.

use amplify::Wrapper;
use bitcoin::blockdata::script::Builder;
use bitcoin::util::psbt::{Input, PartiallySignedTransaction as Psbt};
use bitcoin::{
    EcdsaSig, OutPoint, PackedLockTime, PublicKey, Script, Sequence, Transaction, TxIn,
    Witness,
};

use crate::descriptor::{Error, OutputDescriptor};
use crate::locks::SeqNo;
use crate::payment::Payment;

/// PSBT population and finalization errors
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum PsbtError {
    /// spent transaction does not contain output #{0}
    NoSuchOutput(u32),

    /// PSBT already carries nLockTime {0} conflicting with the descriptor
    /// spending constraints
    LocktimeConflict(u32),

    /// PSBT input #{0} does not exist
    InputUnknown(usize),

    /// PSBT input #{0} contains no usable partial signatures
    NoSignatures(usize),

    /// descriptor resolved from a bare address carries no spending
    /// information and cannot finalize inputs
    AddressDescriptor,
}

impl OutputDescriptor {
    /// Adds an input spending `prev_tx:vout` to the PSBT and populates it
    /// with the descriptor knowledge: UTXO data, BIP32 derivations, redeem
    /// and witness scripts, plus the `nLockTime`/`nSequence` values the
    /// cached spending constraints demand. Returns the new input index.
    ///
    /// When the descriptor requires an `nLockTime` and the PSBT already
    /// carries a different nonzero one, the update is refused: the existing
    /// inputs have committed to it.
    pub fn update_psbt(
        &self,
        prev_tx: &Transaction,
        vout: u32,
        psbt: &mut Psbt,
    ) -> Result<usize, Error> {
        let output = prev_tx
            .output
            .get(vout as usize)
            .ok_or(PsbtError::NoSuchOutput(vout))?;

        if let Some(lock_time) = self.lock_time() {
            let current = psbt.unsigned_tx.lock_time.0;
            if current != 0 {
                return Err(PsbtError::LocktimeConflict(current).into());
            }
            psbt.unsigned_tx.lock_time = PackedLockTime(lock_time.as_u32());
        }

        let seq_no = match (self.seq_no(), self.lock_time()) {
            (Some(seq_no), _) => seq_no,
            // sub-maximal value keeps OP_CHECKLOCKTIMEVERIFY operational
            (None, Some(_)) => SeqNo::unencumbered(false),
            (None, None) => SeqNo::unencumbered(true),
        };

        let mut input = Input {
            non_witness_utxo: Some(prev_tx.clone()),
            ..Default::default()
        };
        if self.is_segwit().unwrap_or(false) {
            input.witness_utxo = Some(output.clone());
        }
        if let Some(redeem) = self.redeem_script() {
            input.redeem_script = Some(redeem.into_inner());
        }
        if let Some(witness) = self.witness_script() {
            input.witness_script = Some(witness.into_inner());
        }
        for key in self.expansion_map() {
            if let Some((pubkey, key_source)) = key.bip32_derivation() {
                input.bip32_derivation.insert(pubkey, key_source);
            }
        }

        psbt.unsigned_tx.input.push(TxIn {
            previous_output: OutPoint::new(prev_tx.txid(), vout),
            script_sig: Script::new(),
            sequence: Sequence(seq_no.as_u32()),
            witness: Witness::default(),
        });
        psbt.inputs.push(input);
        Ok(psbt.inputs.len() - 1)
    }

    /// Finalizes PSBT input `index` from its partial signatures:
    /// miniscript shapes go through the satisfaction search under the
    /// cached constraints, key-only shapes through the standard
    /// single-signature finalizer. Finalized fields are cleared per
    /// BIP 174.
    pub fn finalize_psbt_input(&self, index: usize, psbt: &mut Psbt) -> Result<(), Error> {
        let input = psbt
            .inputs
            .get_mut(index)
            .ok_or(PsbtError::InputUnknown(index))?;
        if input.partial_sigs.is_empty() {
            return Err(PsbtError::NoSignatures(index).into());
        }
        let partial: Vec<(PublicKey, EcdsaSig)> = input
            .partial_sigs
            .iter()
            .map(|(pk, sig)| (*pk, *sig))
            .collect();
        let key_sig = |pk: &PublicKey| -> Result<EcdsaSig, Error> {
            partial
                .iter()
                .find(|(known, _)| known == pk)
                .map(|(_, sig)| *sig)
                .ok_or_else(|| PsbtError::NoSignatures(index).into())
        };

        let (script_sig, witness) = match self.payment() {
            Payment::Pk(pk) => {
                let sig = key_sig(pk)?;
                (
                    Some(Builder::new().push_slice(&sig.to_vec()).into_script()),
                    None,
                )
            }
            Payment::Pkh(pk) => {
                let sig = key_sig(pk)?;
                (
                    Some(
                        Builder::new()
                            .push_slice(&sig.to_vec())
                            .push_key(pk)
                            .into_script(),
                    ),
                    None,
                )
            }
            Payment::Wpkh(pk) => {
                let sig = key_sig(pk)?;
                (
                    None,
                    Some(Witness::from_vec(vec![sig.to_vec(), pk.to_bytes()])),
                )
            }
            Payment::ShWpkh(pk) => {
                let sig = key_sig(pk)?;
                let redeem = self.redeem_script().expect("sh-wrapped payment");
                (
                    Some(
                        Builder::new()
                            .push_slice(redeem.as_inner().as_bytes())
                            .into_script(),
                    ),
                    Some(Witness::from_vec(vec![sig.to_vec(), pk.to_bytes()])),
                )
            }
            Payment::Sh(redeem) => {
                let satisfaction = self.script_satisfaction(&partial)?;
                let builder = satisfaction
                    .stack
                    .iter()
                    .fold(Builder::new(), |builder, item| builder.push_slice(item))
                    .push_slice(redeem.as_inner().as_bytes());
                (Some(builder.into_script()), None)
            }
            Payment::Wsh(witness_script) => {
                let satisfaction = self.script_satisfaction(&partial)?;
                let mut witness = satisfaction.to_witness();
                witness.push(witness_script.as_inner().as_bytes());
                (None, Some(witness))
            }
            Payment::ShWsh(witness_script) => {
                let satisfaction = self.script_satisfaction(&partial)?;
                let redeem = self.redeem_script().expect("sh-wrapped payment");
                let mut witness = satisfaction.to_witness();
                witness.push(witness_script.as_inner().as_bytes());
                (
                    Some(
                        Builder::new()
                            .push_slice(redeem.as_inner().as_bytes())
                            .into_script(),
                    ),
                    Some(witness),
                )
            }
            Payment::Addr(_) => return Err(PsbtError::AddressDescriptor.into()),
        };

        let input = psbt
            .inputs
            .get_mut(index)
            .expect("input presence checked above");
        input.final_script_sig = script_sig;
        input.final_script_witness = witness;
        input.partial_sigs.clear();
        input.sighash_type = None;
        input.redeem_script = None;
        input.witness_script = None;
        input.bip32_derivation.clear();
        Ok(())
    }
}
