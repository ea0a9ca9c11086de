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

//! Key expressions: single tokens within a descriptor resolving to a
//! concrete public key plus derivation metadata. Recognized forms are raw
//! hex public keys, WIF private keys and extended keys with an optional
//! `[fingerprint/path]` origin prefix and a derivation tail.

use std::str::FromStr;

use bitcoin::secp256k1::{self, Secp256k1, Signing, Verification};
use bitcoin::util::bip32::{
    self, ChildNumber, DerivationPath, ExtendedPrivKey, ExtendedPubKey, Fingerprint, KeySource,
};
use bitcoin::{Network, PrivateKey, PublicKey};

const BASE58_CHARSET: &[u8] =
    b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

const XKEY_PREFIXES: [&str; 4] = ["xpub", "xprv", "tpub", "tprv"];

/// Errors resolving a key expression
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum KeyError {
    /// token `{0}` is not recognized as a valid key expression
    InvalidKey(String),

    /// an uncompressed public key can't be used in a SegWit script context
    SegwitRequiresCompressed,

    /// hardened derivation steps can be walked only from an extended
    /// private key
    HardenedFromXpub,

    /// key belongs to a different network than the descriptor ({0})
    NetworkMismatch(Network),

    /// malformed key origin `[{0}]`
    InvalidOrigin(String),

    /// BIP32 derivation failure
    #[from]
    Bip32(bip32::Error),
}

/// A single key token resolved into a concrete public key plus the
/// derivation metadata required for PSBT BIP32 population.
///
/// Invariant: for extended expressions [`KeyExpression::pubkey`] equals the
/// key obtained by walking [`KeyExpression::key_path`] from
/// [`KeyExpression::xpub`].
#[derive(Clone, PartialEq, Eq, Debug, Display)]
#[display("{term}")]
pub struct KeyExpression {
    /// Key expression token as it appeared in the descriptor
    pub term: String,

    /// Resolved public key
    pub pubkey: PublicKey,

    /// Fingerprint of the master key: the pinned origin fingerprint, or the
    /// extended key's own one when no origin is given
    pub master_fingerprint: Option<Fingerprint>,

    /// Derivation path from the master key to the account-level key (the
    /// `[…]` origin part)
    pub origin_path: Option<DerivationPath>,

    /// Derivation path from the account-level key to the final key
    pub key_path: Option<DerivationPath>,

    /// Account-level extended public key, for extended expressions
    pub xpub: Option<ExtendedPubKey>,

    /// Underlying private key, for WIF expressions
    pub private_key: Option<PrivateKey>,
}

impl KeyExpression {
    /// Resolves a key token within the given network and script context.
    pub fn parse<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        term: &str,
        network: Network,
        segwit: bool,
    ) -> Result<KeyExpression, KeyError> {
        let (origin, body) = split_origin(term)?;
        let (master_fingerprint, origin_path) = match origin {
            Some(origin) => {
                let (fpr, path) = match origin.split_once('/') {
                    Some((fpr, path)) => (fpr, Some(path)),
                    None => (origin, None),
                };
                let fpr = Fingerprint::from_str(fpr)
                    .map_err(|_| KeyError::InvalidOrigin(origin.to_owned()))?;
                (Some(fpr), path.map(parse_path).transpose()?)
            }
            None => (None, None),
        };

        if XKEY_PREFIXES.iter().any(|p| body.starts_with(p)) {
            return Self::parse_extended(
                secp,
                term,
                body,
                master_fingerprint,
                origin_path,
                network,
                segwit,
            );
        }

        if (body.len() == 66 || body.len() == 130)
            && body.bytes().all(|b| b.is_ascii_hexdigit())
        {
            let pubkey = PublicKey::from_str(body)
                .map_err(|_| KeyError::InvalidKey(term.to_owned()))?;
            if segwit && !pubkey.compressed {
                return Err(KeyError::SegwitRequiresCompressed);
            }
            return Ok(KeyExpression {
                term: term.to_owned(),
                pubkey,
                master_fingerprint,
                origin_path,
                key_path: None,
                xpub: None,
                private_key: None,
            });
        }

        if looks_like_wif(body) {
            let private_key = PrivateKey::from_wif(body)
                .map_err(|_| KeyError::InvalidKey(term.to_owned()))?;
            if !network_compatible(private_key.network, network) {
                return Err(KeyError::NetworkMismatch(network));
            }
            if segwit && !private_key.compressed {
                return Err(KeyError::SegwitRequiresCompressed);
            }
            return Ok(KeyExpression {
                term: term.to_owned(),
                pubkey: private_key.public_key(secp),
                master_fingerprint,
                origin_path,
                key_path: None,
                xpub: None,
                private_key: Some(private_key),
            });
        }

        Err(KeyError::InvalidKey(term.to_owned()))
    }

    #[allow(clippy::too_many_arguments)]
    fn parse_extended<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        term: &str,
        body: &str,
        master_fingerprint: Option<Fingerprint>,
        origin_path: Option<DerivationPath>,
        network: Network,
        _segwit: bool,
    ) -> Result<KeyExpression, KeyError> {
        let (xkey, tail) = match body.split_once('/') {
            Some((xkey, tail)) => (xkey, Some(tail)),
            None => (body, None),
        };
        let key_path = tail.map(parse_path).transpose()?;
        let steps: Vec<ChildNumber> = key_path
            .as_ref()
            .map(|path| path.into_iter().cloned().collect())
            .unwrap_or_default();

        let (account_xpub, final_xpub) = if body.starts_with("xprv") || body.starts_with("tprv")
        {
            let xprv = ExtendedPrivKey::from_str(xkey)
                .map_err(|_| KeyError::InvalidKey(term.to_owned()))?;
            if !network_compatible(xprv.network, network) {
                return Err(KeyError::NetworkMismatch(network));
            }
            let derived = xprv.derive_priv(secp, &steps)?;
            (
                ExtendedPubKey::from_priv(secp, &xprv),
                ExtendedPubKey::from_priv(secp, &derived),
            )
        } else {
            let xpub = ExtendedPubKey::from_str(xkey)
                .map_err(|_| KeyError::InvalidKey(term.to_owned()))?;
            if !network_compatible(xpub.network, network) {
                return Err(KeyError::NetworkMismatch(network));
            }
            if steps.iter().any(ChildNumber::is_hardened) {
                return Err(KeyError::HardenedFromXpub);
            }
            let derived = xpub.derive_pub(secp, &steps)?;
            (xpub, derived)
        };

        Ok(KeyExpression {
            term: term.to_owned(),
            pubkey: PublicKey::new(final_xpub.public_key),
            master_fingerprint: master_fingerprint.or_else(|| Some(account_xpub.fingerprint())),
            origin_path,
            key_path,
            xpub: Some(account_xpub),
            private_key: None,
        })
    }

    /// Derivation path from the master key to the final key: the origin
    /// path continued by the key path. `None` when the expression pins no
    /// master fingerprint (raw keys and WIFs without origin).
    pub fn full_derivation_path(&self) -> Option<DerivationPath> {
        self.master_fingerprint?;
        let mut path = Vec::new();
        if let Some(ref origin) = self.origin_path {
            path.extend(origin.into_iter().cloned());
        }
        if let Some(ref tail) = self.key_path {
            path.extend(tail.into_iter().cloned());
        }
        Some(path.into())
    }

    /// BIP32 derivation entry for PSBT input/output population, present
    /// for expressions carrying both a master fingerprint and a path.
    pub fn bip32_derivation(&self) -> Option<(secp256k1::PublicKey, KeySource)> {
        let fingerprint = self.master_fingerprint?;
        let path = self.full_derivation_path()?;
        Some((self.pubkey.inner, (fingerprint, path)))
    }
}

fn split_origin(term: &str) -> Result<(Option<&str>, &str), KeyError> {
    if let Some(stripped) = term.strip_prefix('[') {
        let end = stripped
            .find(']')
            .ok_or_else(|| KeyError::InvalidOrigin(term.to_owned()))?;
        Ok((Some(&stripped[..end]), &stripped[end + 1..]))
    } else {
        Ok((None, term))
    }
}

fn parse_path(s: &str) -> Result<DerivationPath, KeyError> {
    s.split('/')
        .map(ChildNumber::from_str)
        .collect::<Result<Vec<_>, _>>()
        .map(DerivationPath::from)
        .map_err(KeyError::from)
}

fn network_compatible(key: Network, descriptor: Network) -> bool {
    (key == Network::Bitcoin) == (descriptor == Network::Bitcoin)
}

fn looks_like_wif(token: &str) -> bool {
    (51..=52).contains(&token.len())
        && matches!(token.as_bytes()[0], b'5' | b'9' | b'K' | b'L' | b'c')
        && token.bytes().all(|b| BASE58_CHARSET.contains(&b))
}

/// Detects whether a token within a miniscript may only be a key
/// expression (as opposed to a fragment name, a number or a hash digest).
pub(crate) fn looks_like_key(token: &str) -> bool {
    if token.starts_with('[') {
        return true;
    }
    if XKEY_PREFIXES.iter().any(|p| token.starts_with(p)) {
        return true;
    }
    if (token.len() == 66 || token.len() == 130)
        && token.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return true;
    }
    looks_like_wif(token)
}

#[cfg(test)]
pub(crate) mod test_helpers {
    use bitcoin::PublicKey;
    use secp256k1::{self, SecretKey, SECP256K1};

    pub(crate) fn gen_secp_pubkeys(n: usize) -> Vec<secp256k1::PublicKey> {
        let mut ret = Vec::with_capacity(n);
        let mut sk = [0; 32];

        for i in 1..n + 1 {
            sk[0] = i as u8;
            sk[1] = (i >> 8) as u8;
            sk[2] = (i >> 16) as u8;

            ret.push(secp256k1::PublicKey::from_secret_key(
                SECP256K1,
                &SecretKey::from_slice(&sk[..]).unwrap(),
            ));
        }
        ret
    }

    pub(crate) fn gen_pubkeys(n: usize) -> Vec<PublicKey> {
        gen_secp_pubkeys(n).into_iter().map(PublicKey::new).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // secret key 0x01 in its four well-known WIF encodings
    const WIF_MAIN_COMPRESSED: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";
    const WIF_MAIN_UNCOMPRESSED: &str = "5HpHagT65TZzG1PH3CSu63k8DbpvD8s5ip4nEB3kEsreAnchuDf";
    const WIF_TEST_COMPRESSED: &str = "cMahea7zqjxrtgAbB7LSGbcQUr1uX1ojuat9jZodMN8rFTv2sfUK";

    const GENERATOR: &str =
        "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    const XPUB: &str = "xpub6ASuArnXKPbfEwhqN6e3mwBcDTgzisQN1wXN9BJcM47sSikHjJf3UFHKkNAWbWMiGj7Wf5uMash7SyYq527Hqck2AxYysAA7xmALppuCkwQ";
    const TPUB: &str = "tpubD8P81yEGkUEs1Hk3kdpSuwLBFZYwMCaVBLckeWVneqkJPivLe6uHAmtXt9RGUSRh5EqMecxinhAybyvgBzwKX3sLGGsuuJgnfzQ47arxTCp";

    fn secp() -> Secp256k1<secp256k1::All> { Secp256k1::new() }

    #[test]
    fn raw_pubkey() {
        let key =
            KeyExpression::parse(&secp(), GENERATOR, Network::Bitcoin, true).unwrap();
        assert_eq!(key.pubkey.to_string(), GENERATOR);
        assert!(key.master_fingerprint.is_none());
        assert!(key.bip32_derivation().is_none());
    }

    #[test]
    fn uncompressed_rejected_in_segwit() {
        let uncompressed = format!(
            "04{}",
            "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
             483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8"
        );
        assert_eq!(
            KeyExpression::parse(&secp(), &uncompressed, Network::Bitcoin, true),
            Err(KeyError::SegwitRequiresCompressed)
        );
        let key =
            KeyExpression::parse(&secp(), &uncompressed, Network::Bitcoin, false).unwrap();
        assert!(!key.pubkey.compressed);
    }

    #[test]
    fn wif_keys() {
        let secp = secp();
        let key =
            KeyExpression::parse(&secp, WIF_MAIN_COMPRESSED, Network::Bitcoin, true).unwrap();
        assert_eq!(key.pubkey.to_string(), GENERATOR);
        assert!(key.private_key.is_some());

        assert_eq!(
            KeyExpression::parse(&secp, WIF_MAIN_UNCOMPRESSED, Network::Bitcoin, true),
            Err(KeyError::SegwitRequiresCompressed)
        );
        KeyExpression::parse(&secp, WIF_MAIN_UNCOMPRESSED, Network::Bitcoin, false).unwrap();

        assert_eq!(
            KeyExpression::parse(&secp, WIF_TEST_COMPRESSED, Network::Bitcoin, true),
            Err(KeyError::NetworkMismatch(Network::Bitcoin))
        );
        KeyExpression::parse(&secp, WIF_TEST_COMPRESSED, Network::Regtest, true).unwrap();
    }

    #[test]
    fn extended_with_origin() {
        let secp = secp();
        let term = format!("[d34db33f/49h/0h/0h]{}/1/5", XPUB);
        let key = KeyExpression::parse(&secp, &term, Network::Bitcoin, true).unwrap();

        assert_eq!(
            key.master_fingerprint,
            Some(Fingerprint::from_str("d34db33f").unwrap())
        );
        assert_eq!(
            key.full_derivation_path(),
            Some(DerivationPath::from_str("m/49'/0'/0'/1/5").unwrap())
        );

        let xpub = ExtendedPubKey::from_str(XPUB).unwrap();
        let expected = xpub
            .derive_pub(&secp, &DerivationPath::from_str("m/1/5").unwrap())
            .unwrap()
            .public_key;
        assert_eq!(key.pubkey.inner, expected);
    }

    #[test]
    fn extended_without_origin_uses_own_fingerprint() {
        let secp = secp();
        let term = format!("{}/0/1", XPUB);
        let key = KeyExpression::parse(&secp, &term, Network::Bitcoin, true).unwrap();
        let xpub = ExtendedPubKey::from_str(XPUB).unwrap();
        assert_eq!(key.master_fingerprint, Some(xpub.fingerprint()));
        assert_eq!(
            key.full_derivation_path(),
            Some(DerivationPath::from_str("m/0/1").unwrap())
        );
    }

    #[test]
    fn hardened_tail_requires_xprv() {
        let term = format!("{}/1h/2", XPUB);
        assert_eq!(
            KeyExpression::parse(&secp(), &term, Network::Bitcoin, true),
            Err(KeyError::HardenedFromXpub)
        );
    }

    #[test]
    fn xkey_network_check() {
        assert_eq!(
            KeyExpression::parse(&secp(), TPUB, Network::Bitcoin, true),
            Err(KeyError::NetworkMismatch(Network::Bitcoin))
        );
        KeyExpression::parse(&secp(), TPUB, Network::Signet, true).unwrap();
    }

    #[test]
    fn token_classification() {
        assert!(looks_like_key(GENERATOR));
        assert!(looks_like_key(WIF_MAIN_COMPRESSED));
        assert!(looks_like_key(&format!("[d34db33f]{}", XPUB)));
        assert!(looks_like_key(TPUB));
        assert!(!looks_like_key("older"));
        assert!(!looks_like_key("144"));
        // 64-char hash digest is not a key
        assert!(!looks_like_key(
            "926a54995ca48600920a19bf7bc502d266614921b3317a01f3d44ecc717acecd"
        ));
    }
}
