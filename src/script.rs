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

//! Script types distinguishing the role a script plays in a payment, plus
//! the consensus and standardness resource limits applied to descriptor
//! scripts.

use amplify::Wrapper;
use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::Instruction;
use bitcoin::{Address, Network, Script, ScriptHash, WScriptHash};

/// Maximum size of a P2SH redeem script (consensus push limit)
pub const MAX_REDEEM_SCRIPT_SIZE: usize = 520;

/// Maximum size of a P2WSH witness script accepted as standard
pub const MAX_WITNESS_SCRIPT_SIZE: usize = 3600;

/// Maximum number of non-push opcodes per script
pub const MAX_OPS_PER_SCRIPT: usize = 201;

/// Errors from the script resource-limit gate
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum LimitsError {
    /// script of {len} bytes exceeds the {max}-byte limit of its context
    ScriptTooLarge {
        /// Actual script length
        len: usize,
        /// Limit for the script context
        max: usize,
    },

    /// script contains {0} non-push opcodes exceeding the limit of 201
    TooManyOps(usize),
}

/// A content of `scriptPubkey` from a transaction output
#[derive(
    Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, From
)]
#[display("{0}", alt = "{0:x}")]
#[wrapper(LowerHex, UpperHex)]
pub struct PubkeyScript(Script);

impl PubkeyScript {
    /// Address representation of the script, if any exists for its template
    pub fn address(&self, network: Network) -> Option<Address> {
        Address::from_script(self.as_inner(), network).ok()
    }
}

/// `redeemScript` hashed into a P2SH `scriptPubkey`, revealed within
/// `sigScript` at spending
#[derive(
    Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, From
)]
#[display("{0}", alt = "{0:x}")]
#[wrapper(LowerHex, UpperHex)]
pub struct RedeemScript(Script);

impl RedeemScript {
    pub fn script_hash(&self) -> ScriptHash { self.as_inner().script_hash() }

    pub fn to_p2sh(&self) -> PubkeyScript {
        Script::new_p2sh(&self.script_hash()).into()
    }
}

/// A script from the `witness` structure; an equivalent of `redeemScript`
/// for witness-based transaction inputs, producing SHA256-based
/// [`WScriptHash`] hashes
#[derive(
    Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, From
)]
#[display("{0}", alt = "{0:x}")]
#[wrapper(LowerHex, UpperHex)]
pub struct WitnessScript(Script);

impl WitnessScript {
    pub fn script_hash(&self) -> WScriptHash { self.as_inner().wscript_hash() }

    pub fn to_p2wsh(&self) -> PubkeyScript {
        Script::new_v0_p2wsh(&self.script_hash()).into()
    }

    /// `redeemScript` for the nested P2SH-P2WSH spending, i.e. the v0
    /// witness program for this script
    pub fn to_redeem_script(&self) -> RedeemScript {
        RedeemScript::from_inner(Script::new_v0_p2wsh(&self.script_hash()))
    }

    pub fn to_p2sh_wsh(&self) -> PubkeyScript {
        self.to_redeem_script().to_p2sh()
    }
}

/// A content of `sigScript` from a transaction input
#[derive(
    Wrapper, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug, Display, From
)]
#[display("{0}", alt = "{0:x}")]
#[wrapper(LowerHex, UpperHex)]
pub struct SigScript(Script);

/// Counts opcodes which are not data pushes (all opcodes above `OP_16`)
pub fn non_push_opcode_count(script: &Script) -> usize {
    script
        .instructions()
        .filter_map(Result::ok)
        .filter(|instr| match instr {
            Instruction::Op(op) => op.to_u8() > opcodes::all::OP_PUSHNUM_16.to_u8(),
            Instruction::PushBytes(_) => false,
        })
        .count()
}

/// Applies the resource-limit gate for a script in a context restricted to
/// `max_size` bytes
pub fn check_limits(script: &Script, max_size: usize) -> Result<(), LimitsError> {
    if script.len() > max_size {
        return Err(LimitsError::ScriptTooLarge {
            len: script.len(),
            max: max_size,
        });
    }
    let ops = non_push_opcode_count(script);
    if ops > MAX_OPS_PER_SCRIPT {
        return Err(LimitsError::TooManyOps(ops));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use bitcoin::blockdata::script::Builder;

    use super::*;

    #[test]
    fn op_counting() {
        let script = Builder::new()
            .push_slice(&[0u8; 20])
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .push_int(16)
            .into_script();
        // two non-push opcodes; OP_PUSHNUM_16 and the data push do not count
        assert_eq!(non_push_opcode_count(&script), 2);
    }

    #[test]
    fn size_gate() {
        let big = Builder::new().push_slice(&[0u8; 521]).into_script();
        assert!(matches!(
            check_limits(&big, MAX_REDEEM_SCRIPT_SIZE),
            Err(LimitsError::ScriptTooLarge { max: 520, .. })
        ));
        check_limits(&big, MAX_WITNESS_SCRIPT_SIZE).unwrap();
    }

    #[test]
    fn ops_gate() {
        let mut builder = Builder::new();
        for _ in 0..202 {
            builder = builder.push_opcode(opcodes::all::OP_DROP);
        }
        assert_eq!(
            check_limits(&builder.into_script(), MAX_WITNESS_SCRIPT_SIZE),
            Err(LimitsError::TooManyOps(202))
        );
    }

    #[test]
    fn nested_program() {
        let ws = WitnessScript::from_inner(
            Builder::new().push_opcode(opcodes::OP_TRUE).into_script(),
        );
        let redeem = ws.to_redeem_script();
        assert_eq!(redeem.as_inner().len(), 34);
        assert!(redeem.as_inner().is_v0_p2wsh());
        assert_eq!(ws.to_p2sh_wsh(), redeem.to_p2sh());
        assert!(ws.to_p2wsh().as_inner().is_v0_p2wsh());
    }
}
