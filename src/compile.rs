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

//! Script assembly: drives the miniscript compiler over the expanded form
//! with concrete keys substituted back, gating on the sanity analysis, and
//! exposes the AST-level data (timelock sites) the satisfier operates on.

use std::collections::BTreeSet;

use bitcoin::{PublicKey, Script};
use miniscript::{Legacy, Miniscript, Satisfier, ScriptContext, Segwitv0, Terminal};

use crate::expand::{substitute_pubkeys, ExpandError, ExpansionMap};
use crate::locks::{LockTime, SeqNo};

/// Errors during miniscript compilation
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum CompileError {
    /// invalid miniscript: {0}
    Parse(String),

    /// miniscript failed sanity analysis: {0}
    InsaneMiniscript(String),

    #[display(inner)]
    #[from]
    Expand(ExpandError),
}

/// A miniscript compiled under its script context with concrete public
/// keys substituted for the `@k` variables.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum CompiledMiniscript {
    /// `sh(MS)` contents, compiled under the legacy P2SH context
    Legacy(Miniscript<PublicKey, Legacy>),

    /// `wsh(MS)` / `sh(wsh(MS))` contents, compiled under the SegWit v0
    /// context
    Segwit(Miniscript<PublicKey, Segwitv0>),
}

impl CompiledMiniscript {
    /// Compiles an expanded miniscript against its expansion map for the
    /// script context implied by the descriptor shape.
    pub fn compile(
        expanded: &str,
        map: &ExpansionMap,
        segwit: bool,
    ) -> Result<CompiledMiniscript, CompileError> {
        let concrete = substitute_pubkeys(expanded, map)?;
        if segwit {
            compile_ctx::<Segwitv0>(&concrete).map(CompiledMiniscript::Segwit)
        } else {
            compile_ctx::<Legacy>(&concrete).map(CompiledMiniscript::Legacy)
        }
    }

    /// Canonical script byte encoding
    pub fn encode(&self) -> Script {
        match self {
            CompiledMiniscript::Legacy(ms) => ms.encode(),
            CompiledMiniscript::Segwit(ms) => ms.encode(),
        }
    }

    /// Distinct `after`/`older` values present in the AST, each sorted in
    /// ascending order. These are the only `(nLockTime, nSequence)` values
    /// any satisfaction of the script may require.
    pub fn timelocks(&self) -> (Vec<LockTime>, Vec<SeqNo>) {
        match self {
            CompiledMiniscript::Legacy(ms) => collect_timelocks(ms),
            CompiledMiniscript::Segwit(ms) => collect_timelocks(ms),
        }
    }

    pub(crate) fn satisfy<S: Satisfier<PublicKey>>(
        &self,
        satisfier: S,
    ) -> Result<Vec<Vec<u8>>, miniscript::Error> {
        match self {
            CompiledMiniscript::Legacy(ms) => ms.satisfy(satisfier),
            CompiledMiniscript::Segwit(ms) => ms.satisfy(satisfier),
        }
    }
}

fn compile_ctx<Ctx: ScriptContext>(
    concrete: &str,
) -> Result<Miniscript<PublicKey, Ctx>, CompileError> {
    let ms = Miniscript::<PublicKey, Ctx>::from_str_insane(concrete)
        .map_err(|err| CompileError::Parse(err.to_string()))?;
    ms.sanity_check()
        .map_err(|err| CompileError::InsaneMiniscript(err.to_string()))?;
    Ok(ms)
}

fn collect_timelocks<Ctx: ScriptContext>(
    ms: &Miniscript<PublicKey, Ctx>,
) -> (Vec<LockTime>, Vec<SeqNo>) {
    let mut afters = BTreeSet::new();
    let mut olders = BTreeSet::new();
    for node in ms.iter() {
        match &node.node {
            Terminal::After(lock_time) => {
                afters.insert(lock_time.0);
            }
            Terminal::Older(seq_no) => {
                olders.insert(seq_no.to_consensus_u32());
            }
            _ => {}
        }
    }
    (
        afters.into_iter().map(LockTime::from).collect(),
        olders.into_iter().map(SeqNo::from).collect(),
    )
}

#[cfg(test)]
mod test {
    use bitcoin::blockdata::opcodes::all as opcode;
    use bitcoin::blockdata::script::Builder;
    use bitcoin::secp256k1::Secp256k1;
    use bitcoin::Network;

    use super::*;
    use crate::expand::expand_miniscript;
    use crate::keys::test_helpers::gen_pubkeys;

    fn compiled(ms: &str, segwit: bool) -> Result<CompiledMiniscript, CompileError> {
        let secp = Secp256k1::new();
        let (expanded, map) =
            expand_miniscript(&secp, ms, Network::Bitcoin, segwit).unwrap();
        CompiledMiniscript::compile(&expanded, &map, segwit)
    }

    #[test]
    fn csv_script_encoding() {
        let key = gen_pubkeys(1)[0];
        let ms = compiled(&format!("and_v(v:pk({}),older(144))", key), true).unwrap();
        let expected = Builder::new()
            .push_key(&key)
            .push_opcode(opcode::OP_CHECKSIGVERIFY)
            .push_int(144)
            .push_opcode(opcode::OP_CSV)
            .into_script();
        assert_eq!(ms.encode(), expected);
    }

    #[test]
    fn timelock_collection() {
        let keys = gen_pubkeys(2);
        let ms = compiled(
            &format!(
                "or_i(and_v(v:pk({}),older(144)),and_v(v:pk({}),after(630000)))",
                keys[0], keys[1]
            ),
            true,
        )
        .unwrap();
        let (afters, olders) = ms.timelocks();
        assert_eq!(afters, vec![LockTime::from(630000u32)]);
        assert_eq!(olders, vec![SeqNo::from(144u32)]);
    }

    #[test]
    fn sigless_scripts_are_insane() {
        assert!(matches!(
            compiled("older(144)", true),
            Err(CompileError::InsaneMiniscript(_))
        ));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            compiled("pk(", true),
            Err(CompileError::Parse(_))
        ));
    }

    #[test]
    fn uncompressed_key_rejected_by_segwit_context() {
        // the key parser already rejects this; the engine context check is
        // exercised through the legacy path accepting it instead
        let secp = Secp256k1::new();
        let uncompressed = format!(
            "04{}{}",
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
            "483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8"
        );
        let ms = format!("pk({})", uncompressed);
        let (expanded, map) =
            expand_miniscript(&secp, &ms, Network::Bitcoin, false).unwrap();
        CompiledMiniscript::compile(&expanded, &map, false).unwrap();
    }
}
