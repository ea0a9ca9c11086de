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

//! Output descriptor façade: isolation of the raw expression (checksum and
//! wildcards), anchored shape dispatch and the immutable
//! [`OutputDescriptor`] object tying together key resolution, miniscript
//! compilation and satisfaction search.

use std::collections::BTreeMap;
use std::str::FromStr;

use amplify::Wrapper;
use bitcoin::secp256k1::{Secp256k1, Signing, Verification};
use bitcoin::{Address, EcdsaSig, Network, PublicKey, Script};

use crate::checksum::{self, ChecksumError};
use crate::compile::{CompileError, CompiledMiniscript};
use crate::expand::{expand_miniscript, ExpandError, ExpansionMap};
use crate::keys::{KeyError, KeyExpression};
use crate::locks::{LockTime, SeqNo};
use crate::payment::{Payment, PaymentError};
use crate::psbt::PsbtError;
use crate::satisfy::{self, fake_signatures, plan_constraints, Preimage, Satisfaction, SatisfyError};
use crate::script::{
    check_limits, LimitsError, PubkeyScript, RedeemScript, WitnessScript,
    MAX_REDEEM_SCRIPT_SIZE, MAX_WITNESS_SCRIPT_SIZE,
};

/// Keywords allowed to open the contents of a bare `sh(…)` descriptor
/// unless miniscript-in-P2SH is explicitly permitted.
const P2SH_TEMPLATES: [&str; 8] = [
    "pk",
    "pkh",
    "wpkh",
    "combo",
    "multi",
    "sortedmulti",
    "multi_a",
    "sortedmulti_a",
];

/// Descriptor processing errors
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum Error {
    /// descriptor expression `{0}` does not match any recognized form
    InvalidExpression(String),

    #[display(inner)]
    #[from]
    Checksum(ChecksumError),

    /// descriptor contains wildcards and requires a derivation index
    InvalidIndex,

    /// bare `sh(…)` accepts only script templates; arbitrary miniscript
    /// contents require an explicit opt-in
    MiniscriptInP2sh,

    /// descriptor carries no miniscript to satisfy
    NoMiniscript,

    #[display(inner)]
    #[from]
    Key(KeyError),

    #[display(inner)]
    #[from]
    Expand(ExpandError),

    #[display(inner)]
    #[from]
    Compile(CompileError),

    #[display(inner)]
    #[from]
    Limits(LimitsError),

    #[display(inner)]
    #[from]
    Payment(PaymentError),

    #[display(inner)]
    #[from]
    Satisfy(SatisfyError),

    #[display(inner)]
    #[from]
    Psbt(PsbtError),
}

/// Construction parameters for [`OutputDescriptor`]
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DescriptorParams {
    /// Network the descriptor operates on
    pub network: Network,

    /// Derivation index substituted for `*` wildcards. All wildcards of an
    /// expression advance in lockstep, not combinatorially.
    pub index: Option<u32>,

    /// Refuse expressions lacking a `#checksum` suffix
    pub checksum_required: bool,

    /// Permit arbitrary miniscript inside bare `sh(…)`. Off by default to
    /// discourage malleable P2SH uses.
    pub allow_miniscript_in_p2sh: bool,

    /// Skip the satisfier probe: the descriptor is used only to compute
    /// scripts and addresses, and carries no spending constraints
    pub address_only: bool,

    /// Preimages known to the honest parties
    pub preimages: Vec<Preimage>,

    /// Key expressions of the parties expected to sign. With `None` every
    /// key of the descriptor is assumed to sign, which may pick a branch no
    /// real signer set can fulfil; passing the actual set is recommended.
    pub signers: Option<Vec<String>>,
}

impl Default for DescriptorParams {
    fn default() -> Self { DescriptorParams::with(Network::Bitcoin) }
}

impl DescriptorParams {
    /// Default parameters for the given network
    pub fn with(network: Network) -> Self {
        DescriptorParams {
            network,
            index: None,
            checksum_required: false,
            allow_miniscript_in_p2sh: false,
            address_only: false,
            preimages: vec![],
            signers: None,
        }
    }
}

/// Introspection view over a descriptor expansion
#[derive(Copy, Clone, Debug)]
pub struct Expansion<'descriptor> {
    /// Expression after checksum stripping and wildcard substitution
    pub expression: &'descriptor str,

    /// Miniscript contents, for script-bearing shapes
    pub miniscript: Option<&'descriptor str>,

    /// Variable form of the miniscript, with keys replaced by `@k`
    pub expanded_miniscript: Option<&'descriptor str>,

    /// Bindings of `@k` variables to resolved keys
    pub keys: &'descriptor ExpansionMap,
}

/// A parsed output descriptor.
///
/// Construction resolves the full pipeline: isolation, shape dispatch, key
/// resolution, miniscript expansion and compilation, resource-limit gating
/// and (for miniscript shapes) extraction of the spending constraints via a
/// fake-signature satisfier probe. The value is immutable afterwards and
/// safe to share across threads for read operations.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OutputDescriptor {
    expression: String,
    network: Network,
    payment: Payment,
    keys: ExpansionMap,
    miniscript: Option<String>,
    expanded: Option<String>,
    compiled: Option<CompiledMiniscript>,
    preimages: Vec<Preimage>,
    lock_time: Option<LockTime>,
    seq_no: Option<SeqNo>,
}

#[derive(Copy, Clone)]
enum Shape<'expr> {
    Addr(&'expr str),
    Pk(&'expr str),
    Pkh(&'expr str),
    Wpkh(&'expr str),
    ShWpkh(&'expr str),
    ShWsh(&'expr str),
    Wsh(&'expr str),
    Sh(&'expr str),
}

fn unwrap_fn<'expr>(name: &str, expression: &'expr str) -> Option<&'expr str> {
    expression
        .strip_prefix(name)?
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn recognize(expression: &str) -> Result<Shape<'_>, Error> {
    if let Some(inner) = unwrap_fn("addr", expression) {
        return Ok(Shape::Addr(inner));
    }
    if let Some(inner) = unwrap_fn("pkh", expression) {
        return Ok(Shape::Pkh(inner));
    }
    if let Some(inner) = unwrap_fn("pk", expression) {
        return Ok(Shape::Pk(inner));
    }
    if let Some(inner) = unwrap_fn("wpkh", expression) {
        return Ok(Shape::Wpkh(inner));
    }
    if let Some(inner) = unwrap_fn("wsh", expression) {
        return Ok(Shape::Wsh(inner));
    }
    if let Some(inner) = unwrap_fn("sh", expression) {
        if let Some(key) = unwrap_fn("wpkh", inner) {
            return Ok(Shape::ShWpkh(key));
        }
        if let Some(ms) = unwrap_fn("wsh", inner) {
            return Ok(Shape::ShWsh(ms));
        }
        return Ok(Shape::Sh(inner));
    }
    Err(Error::InvalidExpression(expression.to_owned()))
}

fn is_p2sh_template(inner: &str) -> bool {
    P2SH_TEMPLATES.iter().any(|name| {
        inner
            .strip_prefix(name)
            .map_or(false, |rest| rest.starts_with('('))
    })
}

/// Strips/verifies the checksum, then substitutes every `*` wildcard with
/// the decimal derivation index. The checksum is validated on the
/// expression as provided, before substitution.
fn isolate(expression: &str, params: &DescriptorParams) -> Result<String, Error> {
    let expression = match expression.split_once('#') {
        Some((prefix, provided)) => {
            checksum::verify(prefix, provided)?;
            prefix
        }
        None if params.checksum_required => return Err(ChecksumError::Missing.into()),
        None => expression,
    };
    if expression.contains('*') {
        let index = params.index.ok_or(Error::InvalidIndex)?;
        Ok(expression.replace('*', &index.to_string()))
    } else {
        Ok(expression.to_owned())
    }
}

impl OutputDescriptor {
    /// Parses a descriptor expression, resolving it into scripts, payment
    /// structure and (for miniscript shapes) spending constraints.
    pub fn with<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        expression: &str,
        params: &DescriptorParams,
    ) -> Result<OutputDescriptor, Error> {
        let expression = isolate(expression, params)?;
        let network = params.network;

        let mut miniscript = None;
        let mut expanded = None;
        let mut compiled = None;
        let mut segwit_context = false;

        let shape = recognize(&expression)?;
        let (payment, keys) = match shape {
            Shape::Addr(inner) => {
                let address = Address::from_str(inner).map_err(PaymentError::from)?;
                (Payment::with_address(address, network)?, ExpansionMap::default())
            }
            Shape::Pk(term) => Self::key_payment(secp, term, network, false, Payment::Pk)?,
            Shape::Pkh(term) => Self::key_payment(secp, term, network, false, Payment::Pkh)?,
            Shape::Wpkh(term) => Self::key_payment(secp, term, network, true, Payment::Wpkh)?,
            Shape::ShWpkh(term) => {
                Self::key_payment(secp, term, network, true, Payment::ShWpkh)?
            }
            Shape::Wsh(ms) | Shape::ShWsh(ms) | Shape::Sh(ms) => {
                let (segwit, wrap): (bool, fn(Script) -> Payment) = match shape {
                    Shape::Wsh(_) => {
                        (true, |script| Payment::Wsh(WitnessScript::from_inner(script)))
                    }
                    Shape::ShWsh(_) => {
                        (true, |script| Payment::ShWsh(WitnessScript::from_inner(script)))
                    }
                    _ => (false, |script| Payment::Sh(RedeemScript::from_inner(script))),
                };
                if !segwit && !params.allow_miniscript_in_p2sh && !is_p2sh_template(ms) {
                    return Err(Error::MiniscriptInP2sh);
                }
                segwit_context = segwit;

                let (expanded_ms, keys) = expand_miniscript(secp, ms, network, segwit)?;
                let ms_compiled = CompiledMiniscript::compile(&expanded_ms, &keys, segwit)?;
                let script = ms_compiled.encode();
                let max_size = if segwit {
                    MAX_WITNESS_SCRIPT_SIZE
                } else {
                    MAX_REDEEM_SCRIPT_SIZE
                };
                check_limits(&script, max_size)?;

                miniscript = Some(ms.to_owned());
                expanded = Some(expanded_ms);
                compiled = Some(ms_compiled);
                (wrap(script), keys)
            }
        };

        let (lock_time, seq_no) = match &compiled {
            Some(compiled) if !params.address_only => {
                let signer_pubkeys: Vec<PublicKey> = match &params.signers {
                    Some(signers) => signers
                        .iter()
                        .map(|term| {
                            KeyExpression::parse(secp, term, network, segwit_context)
                                .map(|key| key.pubkey)
                        })
                        .collect::<Result<_, _>>()?,
                    None => keys.pubkeys().collect(),
                };
                // keys foreign to the expansion map cannot contribute
                let signers = fake_signatures(
                    signer_pubkeys
                        .into_iter()
                        .filter(|pk| keys.contains_pubkey(*pk)),
                );
                plan_constraints(compiled, &signers, &params.preimages)?
            }
            _ => (None, None),
        };

        Ok(OutputDescriptor {
            expression,
            network,
            payment,
            keys,
            miniscript,
            expanded,
            compiled,
            preimages: params.preimages.clone(),
            lock_time,
            seq_no,
        })
    }

    fn key_payment<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        term: &str,
        network: Network,
        segwit: bool,
        variant: fn(PublicKey) -> Payment,
    ) -> Result<(Payment, ExpansionMap), Error> {
        let key = KeyExpression::parse(secp, term, network, segwit)?;
        let payment = variant(key.pubkey);
        Ok((payment, ExpansionMap::with_single_key(key)))
    }

    /// Computes the checksum of a descriptor expression prefix
    #[inline]
    pub fn checksum(expression: &str) -> Result<String, ChecksumError> {
        checksum::checksum(expression)
    }

    /// Address for the resolved payment; fails for `pk(…)` which has none
    #[inline]
    pub fn address(&self) -> Result<Address, Error> {
        self.payment.address(self.network).map_err(Error::from)
    }

    /// The output script of the descriptor
    #[inline]
    pub fn script_pubkey(&self) -> PubkeyScript { self.payment.script_pubkey() }

    /// Redeem script for `sh`-wrapped shapes
    #[inline]
    pub fn redeem_script(&self) -> Option<RedeemScript> { self.payment.redeem_script() }

    /// Witness script for `wsh`-backed shapes
    #[inline]
    pub fn witness_script(&self) -> Option<WitnessScript> { self.payment.witness_script() }

    /// Whether spending uses the segregated witness; `None` for
    /// address-only descriptors
    #[inline]
    pub fn is_segwit(&self) -> Option<bool> { self.payment.is_segwit() }

    /// The `nLockTime` the spending transaction must carry, extracted at
    /// construction by the satisfier probe
    #[inline]
    pub fn lock_time(&self) -> Option<LockTime> { self.lock_time }

    /// The input `nSequence` the spending transaction must carry,
    /// extracted at construction by the satisfier probe
    #[inline]
    pub fn seq_no(&self) -> Option<SeqNo> { self.seq_no }

    /// Network the descriptor was constructed for
    #[inline]
    pub fn network(&self) -> Network { self.network }

    /// The resolved payment structure
    #[inline]
    pub fn payment(&self) -> &Payment { &self.payment }

    /// Runs the satisfier with the given signatures (and the preimages
    /// provided at construction) under the cached
    /// `(nLockTime, nSequence)` constraints. Signatures over keys foreign
    /// to the descriptor are silently ignored.
    pub fn script_satisfaction(
        &self,
        signatures: &[(PublicKey, EcdsaSig)],
    ) -> Result<Satisfaction, Error> {
        let compiled = self.compiled.as_ref().ok_or(Error::NoMiniscript)?;
        let sigs: BTreeMap<PublicKey, EcdsaSig> = signatures
            .iter()
            .filter(|(pk, _)| self.keys.contains_pubkey(*pk))
            .copied()
            .collect();
        satisfy::satisfy(compiled, &sigs, &self.preimages, self.lock_time, self.seq_no)
            .map_err(Error::from)
    }

    /// Introspection over the expansion products
    pub fn expand(&self) -> Expansion<'_> {
        Expansion {
            expression: &self.expression,
            miniscript: self.miniscript.as_deref(),
            expanded_miniscript: self.expanded.as_deref(),
            keys: &self.keys,
        }
    }

    pub(crate) fn expansion_map(&self) -> &ExpansionMap { &self.keys }
}
