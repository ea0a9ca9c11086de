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

// Coding conventions
#![recursion_limit = "256"]
#![deny(dead_code)]

//! Bitcoin output descriptors with embedded miniscript: parsing, script
//! compilation, satisfaction search and PSBT input population.
//!
//! General workflow for working with descriptor expressions:
//! ```text
//! Expression -> isolate -> shape dispatch -> Payment -> scriptPubkey, address
//!                               |
//!                               +-> expand -> compile -> witness/redeem script
//!                                        |
//!                                        +-> satisfy -> satisfaction,
//!                                                       nLockTime, nSequence
//! ```
//!
//! Key material is decoupled from policy via positional variables `@0, @1,
//! …` (see [`ExpansionMap`]); the satisfier consumes known signatures and
//! hash preimages, explores the non-malleable solution set only, and pins
//! the branch to the `(nLockTime, nSequence)` pair the descriptor
//! committed to at construction time.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

pub mod checksum;
mod compile;
mod descriptor;
mod expand;
mod keys;
pub mod locks;
mod payment;
mod psbt;
mod satisfy;
mod script;

pub use checksum::ChecksumError;
pub use compile::{CompileError, CompiledMiniscript};
pub use descriptor::{DescriptorParams, Error, Expansion, OutputDescriptor};
pub use expand::{expand_miniscript, ExpandError, ExpansionMap};
pub use keys::{KeyError, KeyExpression};
pub use payment::{Payment, PaymentError};
pub use psbt::PsbtError;
pub use satisfy::{Digest, Preimage, PreimageError, Satisfaction, SatisfyError};
pub use script::{
    check_limits, non_push_opcode_count, LimitsError, PubkeyScript, RedeemScript,
    SigScript, WitnessScript, MAX_OPS_PER_SCRIPT, MAX_REDEEM_SCRIPT_SIZE,
    MAX_WITNESS_SCRIPT_SIZE,
};
