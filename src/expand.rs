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

//! Miniscript expansion: rewriting of a miniscript fragment replacing each
//! key expression with a positional variable `@0, @1, …`, decoupling the
//! policy structure from the key material.

use std::slice;

use bitcoin::secp256k1::{Secp256k1, Signing, Verification};
use bitcoin::{Network, PublicKey};

use crate::keys::{looks_like_key, KeyError, KeyExpression};

/// Errors during miniscript expansion and reverse substitution
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ExpandError {
    /// two distinct key expressions resolve to the same public key {0}
    DuplicatePubkey(PublicKey),

    /// miniscript references variable `@{0}` absent from the expansion map
    UnknownVariable(usize),

    /// `@` variable reference without an index in expanded miniscript
    MalformedVariable,

    #[display(inner)]
    #[from]
    Key(KeyError),
}

/// Ordered mapping from positional variables `@0, @1, …` to resolved
/// [`KeyExpression`]s.
///
/// Indices are dense, monotonic and reflect the order of first appearance
/// within the source miniscript; all resolved public keys are distinct.
#[derive(Wrapper, Clone, PartialEq, Eq, Debug, Default, From)]
pub struct ExpansionMap(Vec<KeyExpression>);

impl ExpansionMap {
    #[inline]
    pub fn len(&self) -> usize { self.0.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Key expression bound to the variable `@index`
    #[inline]
    pub fn get(&self, index: usize) -> Option<&KeyExpression> { self.0.get(index) }

    #[inline]
    pub fn iter(&self) -> slice::Iter<'_, KeyExpression> { self.0.iter() }

    /// All public keys participating the map, in variable order
    pub fn pubkeys(&self) -> impl Iterator<Item = PublicKey> + '_ {
        self.0.iter().map(|key| key.pubkey)
    }

    #[inline]
    pub fn contains_pubkey(&self, pubkey: PublicKey) -> bool {
        self.0.iter().any(|key| key.pubkey == pubkey)
    }

    /// Wraps a single already-resolved key as a one-entry map (used by
    /// key-only descriptor shapes).
    pub fn with_single_key(key: KeyExpression) -> ExpansionMap { ExpansionMap(vec![key]) }
}

impl<'map> IntoIterator for &'map ExpansionMap {
    type Item = &'map KeyExpression;
    type IntoIter = slice::Iter<'map, KeyExpression>;

    fn into_iter(self) -> Self::IntoIter { self.0.iter() }
}

/// Rewrites a miniscript string replacing every key expression with its
/// positional variable, returning the variable-form miniscript together
/// with the expansion map. Deterministic for a given input.
pub fn expand_miniscript<C: Signing + Verification>(
    secp: &Secp256k1<C>,
    miniscript: &str,
    network: Network,
    segwit: bool,
) -> Result<(String, ExpansionMap), ExpandError> {
    let mut expanded = String::with_capacity(miniscript.len());
    let mut keys: Vec<KeyExpression> = Vec::new();

    let mut expand_atom = |atom: &str, expanded: &mut String| -> Result<(), ExpandError> {
        if !looks_like_key(atom) {
            expanded.push_str(atom);
            return Ok(());
        }
        let index = match keys.iter().position(|key| key.term == atom) {
            Some(index) => index,
            None => {
                let key = KeyExpression::parse(secp, atom, network, segwit)?;
                if keys.iter().any(|known| known.pubkey == key.pubkey) {
                    return Err(ExpandError::DuplicatePubkey(key.pubkey));
                }
                keys.push(key);
                keys.len() - 1
            }
        };
        expanded.push('@');
        expanded.push_str(&index.to_string());
        Ok(())
    };

    let mut start = 0;
    for (pos, ch) in miniscript.char_indices() {
        if matches!(ch, '(' | ')' | ',' | ':') {
            expand_atom(&miniscript[start..pos], &mut expanded)?;
            expanded.push(ch);
            start = pos + 1;
        }
    }
    expand_atom(&miniscript[start..], &mut expanded)?;

    Ok((expanded, ExpansionMap(keys)))
}

/// Reverse substitution: replaces every `@k` variable with the hex form of
/// its bound public key, refusing to emit anything containing an
/// unresolved placeholder.
pub(crate) fn substitute_pubkeys(
    expanded: &str,
    map: &ExpansionMap,
) -> Result<String, ExpandError> {
    let mut concrete = String::with_capacity(expanded.len() * 2);
    let mut chars = expanded.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '@' {
            concrete.push(ch);
            continue;
        }
        let mut digits = String::new();
        while let Some(digit) = chars.peek().filter(|c| c.is_ascii_digit()) {
            digits.push(*digit);
            chars.next();
        }
        let index: usize = digits.parse().map_err(|_| ExpandError::MalformedVariable)?;
        let key = map.get(index).ok_or(ExpandError::UnknownVariable(index))?;
        concrete.push_str(&key.pubkey.to_string());
    }
    Ok(concrete)
}

#[cfg(test)]
mod test {
    use bitcoin::secp256k1::{self, Secp256k1};

    use super::*;
    use crate::keys::test_helpers::gen_pubkeys;

    fn secp() -> Secp256k1<secp256k1::All> { Secp256k1::new() }

    #[test]
    fn first_appearance_order() {
        let keys = gen_pubkeys(3);
        let ms = format!(
            "or_d(pk({}),and_v(v:pk({}),pk({})))",
            keys[2], keys[0], keys[1]
        );
        let (expanded, map) =
            expand_miniscript(&secp(), &ms, bitcoin::Network::Bitcoin, true).unwrap();
        assert_eq!(expanded, "or_d(pk(@0),and_v(v:pk(@1),pk(@2)))");
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(0).unwrap().pubkey, keys[2]);
        assert_eq!(map.get(1).unwrap().pubkey, keys[0]);
        assert_eq!(map.get(2).unwrap().pubkey, keys[1]);
    }

    #[test]
    fn repeated_token_reuses_variable() {
        let keys = gen_pubkeys(1);
        let ms = format!("and_v(v:pk({}),pk({}))", keys[0], keys[0]);
        let (expanded, map) =
            expand_miniscript(&secp(), &ms, bitcoin::Network::Bitcoin, true).unwrap();
        assert_eq!(expanded, "and_v(v:pk(@0),pk(@0))");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn duplicate_pubkey_detection() {
        let keys = gen_pubkeys(1);
        // same key material spelled in two distinct tokens
        let ms = format!(
            "and_v(v:pk({}),pk({}))",
            keys[0],
            keys[0].to_string().to_uppercase()
        );
        assert_eq!(
            expand_miniscript(&secp(), &ms, bitcoin::Network::Bitcoin, true),
            Err(ExpandError::DuplicatePubkey(keys[0]))
        );
    }

    #[test]
    fn non_key_atoms_untouched() {
        let keys = gen_pubkeys(1);
        let digest = "926a54995ca48600920a19bf7bc502d266614921b3317a01f3d44ecc717acecd";
        let ms = format!(
            "and_v(v:pk({}),or_b(older(144),a:sha256({})))",
            keys[0], digest
        );
        let (expanded, _) =
            expand_miniscript(&secp(), &ms, bitcoin::Network::Bitcoin, true).unwrap();
        assert_eq!(
            expanded,
            format!("and_v(v:pk(@0),or_b(older(144),a:sha256({})))", digest)
        );
    }

    #[test]
    fn substitution_restores_keys() {
        let keys = gen_pubkeys(2);
        let ms = format!("multi(2,{},{})", keys[0], keys[1]);
        let (expanded, map) =
            expand_miniscript(&secp(), &ms, bitcoin::Network::Bitcoin, true).unwrap();
        assert_eq!(substitute_pubkeys(&expanded, &map).unwrap(), ms);
    }

    #[test]
    fn unresolved_placeholders_rejected() {
        let map = ExpansionMap::default();
        assert_eq!(
            substitute_pubkeys("pk(@0)", &map),
            Err(ExpandError::UnknownVariable(0))
        );
        assert_eq!(
            substitute_pubkeys("pk(@)", &map),
            Err(ExpandError::MalformedVariable)
        );
    }
}
