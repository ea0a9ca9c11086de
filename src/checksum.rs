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

//! Descriptor checksum codec: the 8-character `#suffix` defined by the
//! bitcoin descriptor specification. The checksum is a function of the
//! expression prefix as written, so it is computed before any wildcard
//! substitution takes place.

/// Characters which may appear in a descriptor expression, in the order
/// assigning each of them a symbol class (`pos & 31`) and a group class
/// (`pos >> 5`).
const INPUT_CHARSET: &str = "0123456789()[],'/*abcdefgh@:$%{}IJKLMNOPQRSTUVWXYZ&+-.;<=>?!^_|~ijklmnopqrstuvwxyzABCDEFGH`#\"\\ ";

/// Alphabet the checksum itself is expressed in (bech32 charset).
const CHECKSUM_CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// Length of the checksum suffix (sans `#`)
pub const CHECKSUM_LEN: usize = 8;

/// Errors during descriptor checksum computation and verification
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display, Error)]
#[display(doc_comments)]
pub enum ChecksumError {
    /// character `{0}` may not appear in a descriptor expression
    InvalidCharacter(char),

    /// descriptor checksum `{actual}` does not match the computed
    /// `{expected}`
    Mismatch {
        /// Checksum computed over the expression prefix
        expected: String,
        /// Checksum as provided within the expression
        actual: String,
    },

    /// descriptor lacks the required checksum suffix
    Missing,
}

fn poly_mod(mut c: u64, val: u64) -> u64 {
    let c0 = c >> 35;
    c = ((c & 0x7ffffffff) << 5) ^ val;
    if c0 & 1 != 0 {
        c ^= 0xf5dee51989;
    }
    if c0 & 2 != 0 {
        c ^= 0xa9fdca3312;
    }
    if c0 & 4 != 0 {
        c ^= 0x1bab10e32d;
    }
    if c0 & 8 != 0 {
        c ^= 0x3706b1677a;
    }
    if c0 & 16 != 0 {
        c ^= 0x644d626ffd;
    }
    c
}

/// Computes the 8-character checksum of a descriptor expression prefix
/// (the part before `#`).
pub fn checksum(expr: &str) -> Result<String, ChecksumError> {
    let mut c = 1u64;
    let mut cls = 0u64;
    let mut cls_count = 0;
    for ch in expr.chars() {
        let pos = INPUT_CHARSET
            .find(ch)
            .ok_or(ChecksumError::InvalidCharacter(ch))? as u64;
        c = poly_mod(c, pos & 31);
        cls = cls * 3 + (pos >> 5);
        cls_count += 1;
        if cls_count == 3 {
            c = poly_mod(c, cls);
            cls = 0;
            cls_count = 0;
        }
    }
    if cls_count > 0 {
        c = poly_mod(c, cls);
    }
    for _ in 0..CHECKSUM_LEN {
        c = poly_mod(c, 0);
    }
    c ^= 1;

    let mut sum = String::with_capacity(CHECKSUM_LEN);
    for j in 0..CHECKSUM_LEN {
        sum.push(CHECKSUM_CHARSET[((c >> (5 * (7 - j))) & 31) as usize] as char);
    }
    Ok(sum)
}

/// Verifies a provided checksum against the freshly computed one.
pub fn verify(expr: &str, provided: &str) -> Result<(), ChecksumError> {
    let expected = checksum(expr)?;
    if expected != provided {
        return Err(ChecksumError::Mismatch {
            expected,
            actual: provided.to_owned(),
        });
    }
    Ok(())
}
