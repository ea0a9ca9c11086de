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

//! Satisfaction search: given known signatures and hash preimages, finds a
//! non-malleable way of making a compiled miniscript evaluate to true and
//! the `nLockTime`/`nSequence` values the spending transaction must carry
//! for the chosen branch.
//!
//! The search assumes the attacker holds no private keys of participating
//! pubkeys and knows only the preimages honest users know; only the
//! engine's non-malleable solutions are ever considered.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::iter;
use std::str::FromStr;

use amplify::Wrapper;
use bitcoin::blockdata::script::Builder;
use bitcoin::blockdata::witness::Witness;
use bitcoin::hashes::{hash160, ripemd160, sha256, Hash};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::{EcdsaSig, LockTime as BitcoinLockTime, PublicKey, Sequence};
use miniscript::hash256;
use miniscript::{Preimage32, Satisfier};

use crate::compile::CompiledMiniscript;
use crate::locks::{LockTime, SeqNo};
use crate::script::SigScript;

/// Errors of the satisfaction search
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum SatisfyError {
    /// no non-malleable satisfaction exists for the given signatures and
    /// preimages
    Unresolvable,

    /// no satisfaction matches the `nLockTime`/`nSequence` constraints the
    /// signatures have committed to
    ConstraintsUnmet,
}

/// Errors validating hash digests and preimages at ingest
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum PreimageError {
    /// `{0}` is not a recognized hash digest call
    UnknownHashFunction(String),

    /// digest call `{0}` carries hex of the wrong length for its hash
    /// function
    InvalidDigest(String),
}

/// A hash-lock digest: one of the four hash calls a miniscript may embed.
///
/// The textual form is the digest call as it appears inside a miniscript,
/// e.g. `sha256(<64 hex chars>)`; hex length is validated at parse time
/// (64 characters for sha256/hash256, 40 for ripemd160/hash160).
#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub enum Digest {
    Sha256(sha256::Hash),
    Hash256(hash256::Hash),
    Ripemd160(ripemd160::Hash),
    Hash160(hash160::Hash),
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Digest::Sha256(hash) => write!(f, "sha256({})", hash),
            Digest::Hash256(hash) => write!(f, "hash256({})", hash),
            Digest::Ripemd160(hash) => write!(f, "ripemd160({})", hash),
            Digest::Hash160(hash) => write!(f, "hash160({})", hash),
        }
    }
}

impl FromStr for Digest {
    type Err = PreimageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (func, hex) = s
            .strip_suffix(')')
            .and_then(|prefix| prefix.split_once('('))
            .ok_or_else(|| PreimageError::UnknownHashFunction(s.to_owned()))?;
        let invalid = || PreimageError::InvalidDigest(s.to_owned());
        match func {
            "sha256" => sha256::Hash::from_str(hex)
                .map(Digest::Sha256)
                .map_err(|_| invalid()),
            "hash256" => hash256::Hash::from_str(hex)
                .map(Digest::Hash256)
                .map_err(|_| invalid()),
            "ripemd160" => ripemd160::Hash::from_str(hex)
                .map(Digest::Ripemd160)
                .map_err(|_| invalid()),
            "hash160" => hash160::Hash::from_str(hex)
                .map(Digest::Hash160)
                .map_err(|_| invalid()),
            _ => Err(PreimageError::UnknownHashFunction(s.to_owned())),
        }
    }
}

/// A hash digest together with its known 32-byte preimage.
#[derive(Copy, Clone, PartialOrd, Ord, PartialEq, Eq, Hash, Debug)]
pub struct Preimage {
    /// Digest site within the miniscript this preimage unlocks
    pub digest: Digest,

    /// The 32-byte preimage
    pub preimage: Preimage32,
}

impl Preimage {
    /// Parses a textual digest call, pairing it with the preimage.
    pub fn with(digest: &str, preimage: Preimage32) -> Result<Preimage, PreimageError> {
        Ok(Preimage {
            digest: digest.parse()?,
            preimage,
        })
    }

    /// Preimage for a `sha256(…)` site, computing the digest
    pub fn sha256(preimage: Preimage32) -> Preimage {
        Preimage {
            digest: Digest::Sha256(sha256::Hash::hash(&preimage)),
            preimage,
        }
    }

    /// Preimage for a `hash256(…)` site, computing the digest
    pub fn hash256(preimage: Preimage32) -> Preimage {
        Preimage {
            digest: Digest::Hash256(hash256::Hash::hash(&preimage)),
            preimage,
        }
    }

    /// Preimage for a `ripemd160(…)` site, computing the digest
    pub fn ripemd160(preimage: Preimage32) -> Preimage {
        Preimage {
            digest: Digest::Ripemd160(ripemd160::Hash::hash(&preimage)),
            preimage,
        }
    }

    /// Preimage for a `hash160(…)` site, computing the digest
    pub fn hash160(preimage: Preimage32) -> Preimage {
        Preimage {
            digest: Digest::Hash160(hash160::Hash::hash(&preimage)),
            preimage,
        }
    }
}

/// Script satisfaction: the unlocking data making a script evaluate to
/// true, with the consensus fields the spending transaction must carry for
/// the chosen branch to be valid.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Satisfaction {
    /// Satisfaction stack in witness order, without the trailing
    /// witness/redeem script
    pub stack: Vec<Vec<u8>>,

    /// Required transaction `nLockTime`, if the branch uses a CLTV lock
    pub lock_time: Option<LockTime>,

    /// Required input `nSequence`, if the branch uses a CSV lock
    pub seq_no: Option<SeqNo>,
}

impl Satisfaction {
    /// Satisfaction materialized as `sigScript` data (legacy contexts): a
    /// sequence of pushes of the stack items
    pub fn to_sig_script(&self) -> SigScript {
        SigScript::from_inner(
            self.stack
                .iter()
                .fold(Builder::new(), |builder, item| builder.push_slice(item))
                .into_script(),
        )
    }

    /// Satisfaction materialized as a witness stack (SegWit contexts)
    pub fn to_witness(&self) -> Witness { Witness::from_vec(self.stack.clone()) }
}

/// The knowns table handed to the engine satisfier: signatures by pubkey,
/// preimages by digest, and the timelock values the transaction is pinned
/// to (an unset lock refuses every branch requiring one).
#[derive(Copy, Clone)]
pub(crate) struct Knowns<'data> {
    pub sigs: &'data BTreeMap<PublicKey, EcdsaSig>,
    pub preimages: &'data [Preimage],
    pub lock_time: Option<LockTime>,
    pub seq_no: Option<SeqNo>,
}

impl<'data> Knowns<'data> {
    fn preimage(&self, digest: Digest) -> Option<Preimage32> {
        self.preimages
            .iter()
            .find(|known| known.digest == digest)
            .map(|known| known.preimage)
    }
}

impl<'data> Satisfier<PublicKey> for Knowns<'data> {
    fn lookup_ecdsa_sig(&self, pk: &PublicKey) -> Option<EcdsaSig> {
        self.sigs.get(pk).copied()
    }

    fn lookup_sha256(&self, digest: &sha256::Hash) -> Option<Preimage32> {
        self.preimage(Digest::Sha256(*digest))
    }

    fn lookup_hash256(&self, digest: &hash256::Hash) -> Option<Preimage32> {
        self.preimage(Digest::Hash256(*digest))
    }

    fn lookup_ripemd160(&self, digest: &ripemd160::Hash) -> Option<Preimage32> {
        self.preimage(Digest::Ripemd160(*digest))
    }

    fn lookup_hash160(&self, digest: &hash160::Hash) -> Option<Preimage32> {
        self.preimage(Digest::Hash160(*digest))
    }

    fn check_after(&self, required: BitcoinLockTime) -> bool {
        self.lock_time
            .map_or(false, |lock_time| {
                lock_time.satisfies(LockTime::from(required.to_consensus_u32()))
            })
    }

    fn check_older(&self, required: Sequence) -> bool {
        self.seq_no
            .map_or(false, |seq_no| {
                seq_no.satisfies(SeqNo::from(required.to_consensus_u32()))
            })
    }
}

/// Synthesizes signatures for an assumed signer set: 64 zero bytes wrapped
/// as a sighash-all signature, sufficient for probing which branches the
/// signer set can unlock.
pub(crate) fn fake_signatures(
    pubkeys: impl IntoIterator<Item = PublicKey>,
) -> BTreeMap<PublicKey, EcdsaSig> {
    let sig = EcdsaSig::sighash_all(
        Signature::from_compact(&[0u8; 64]).expect("valid zero signature"),
    );
    pubkeys.into_iter().map(|pk| (pk, sig)).collect()
}

/// Extracts the spending constraints for a miniscript given the assumed
/// signer set and known preimages: enumerates timelock configurations
/// harvested from the AST (no locks first, then ascending values) and
/// returns the first one admitting a non-malleable satisfaction.
pub(crate) fn plan_constraints(
    ms: &CompiledMiniscript,
    signers: &BTreeMap<PublicKey, EcdsaSig>,
    preimages: &[Preimage],
) -> Result<(Option<LockTime>, Option<SeqNo>), SatisfyError> {
    let (afters, olders) = ms.timelocks();
    for lock_time in iter::once(None).chain(afters.into_iter().map(Some)) {
        for seq_no in iter::once(None).chain(olders.iter().copied().map(Some)) {
            let knowns = Knowns {
                sigs: signers,
                preimages,
                lock_time,
                seq_no,
            };
            if ms.satisfy(knowns).is_ok() {
                return Ok((lock_time, seq_no));
            }
        }
    }
    Err(SatisfyError::Unresolvable)
}

/// Materializes a satisfaction under pinned `(nLockTime, nSequence)`
/// constraints. Adding further knowns can only widen the solution set, so
/// any satisfaction found remains valid for supersets of `sigs` and
/// `preimages`.
pub(crate) fn satisfy(
    ms: &CompiledMiniscript,
    sigs: &BTreeMap<PublicKey, EcdsaSig>,
    preimages: &[Preimage],
    lock_time: Option<LockTime>,
    seq_no: Option<SeqNo>,
) -> Result<Satisfaction, SatisfyError> {
    let knowns = Knowns {
        sigs,
        preimages,
        lock_time,
        seq_no,
    };
    let stack = ms.satisfy(knowns).map_err(|_| {
        if lock_time.is_none() && seq_no.is_none() {
            SatisfyError::Unresolvable
        } else {
            SatisfyError::ConstraintsUnmet
        }
    })?;
    Ok(Satisfaction {
        stack,
        lock_time,
        seq_no,
    })
}
