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

//! Payment structures: discriminated representation of the scriptPubkey
//! templates a descriptor may resolve into, carrying the data needed to
//! rebuild both the output script and the spending-side scripts.

use amplify::Wrapper;
use bitcoin::util::address::{self, Payload, WitnessVersion};
use bitcoin::{Address, Network, PublicKey, Script};

use crate::script::{PubkeyScript, RedeemScript, WitnessScript};

/// Errors in payment construction and address handling
#[derive(Clone, PartialEq, Eq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum PaymentError {
    /// cannot decode address: {0}
    #[from]
    InvalidAddress(address::Error),

    /// address `{0}` belongs to a different network than the descriptor
    /// ({1})
    AddressNetworkMismatch(Address, Network),

    /// scriptPubkey template of address `{0}` is not supported
    UnsupportedTemplate(Address),

    /// no address form exists for a raw public key output
    NoAddress,
}

/// One of the supported payment structures.
///
/// Taproot outputs are recognized only via an address literal and are thus
/// represented by the [`Payment::Addr`] variant.
#[derive(Clone, PartialEq, Eq, Debug)]
#[non_exhaustive]
pub enum Payment {
    /// Output paying directly to a public key (`pk(KEY)`)
    Pk(PublicKey),

    /// Legacy pay-to-pubkey-hash (`pkh(KEY)`)
    Pkh(PublicKey),

    /// Native SegWit v0 pay-to-witness-pubkey-hash (`wpkh(KEY)`)
    Wpkh(PublicKey),

    /// Nested SegWit `sh(wpkh(KEY))`
    ShWpkh(PublicKey),

    /// Bare P2SH with a known redeem script (`sh(SCRIPT)`)
    Sh(RedeemScript),

    /// Native SegWit v0 P2WSH with a known witness script (`wsh(SCRIPT)`)
    Wsh(WitnessScript),

    /// P2SH-wrapped P2WSH (`sh(wsh(SCRIPT))`)
    ShWsh(WitnessScript),

    /// Output known only by its address (`addr(ADDR)`)
    Addr(Address),
}

impl Payment {
    /// Classifies an address literal into a payment structure, verifying
    /// the network and that the script template is one of base58
    /// P2PKH/P2SH, bech32 v0 P2WPKH/P2WSH or bech32m P2TR.
    pub fn with_address(address: Address, network: Network) -> Result<Payment, PaymentError> {
        if !address_network_ok(&address, network) {
            return Err(PaymentError::AddressNetworkMismatch(address, network));
        }
        match &address.payload {
            Payload::PubkeyHash(_) | Payload::ScriptHash(_) => {}
            Payload::WitnessProgram { version, program }
                if *version == WitnessVersion::V0
                    && (program.len() == 20 || program.len() == 32) => {}
            Payload::WitnessProgram { version, program }
                if *version == WitnessVersion::V1 && program.len() == 32 => {}
            _ => return Err(PaymentError::UnsupportedTemplate(address)),
        }
        Ok(Payment::Addr(address))
    }

    /// The scriptPubkey for this payment structure
    pub fn script_pubkey(&self) -> PubkeyScript {
        match self {
            Payment::Pk(pk) => Script::new_p2pk(pk).into(),
            Payment::Pkh(pk) => Script::new_p2pkh(&pk.pubkey_hash()).into(),
            Payment::Wpkh(pk) => {
                Script::new_v0_p2wpkh(&pk.wpubkey_hash().expect("uncompressed key")).into()
            }
            Payment::ShWpkh(pk) => RedeemScript::from_inner(Script::new_v0_p2wpkh(
                &pk.wpubkey_hash().expect("uncompressed key"),
            ))
            .to_p2sh(),
            Payment::Sh(redeem) => redeem.to_p2sh(),
            Payment::Wsh(witness) => witness.to_p2wsh(),
            Payment::ShWsh(witness) => witness.to_p2sh_wsh(),
            Payment::Addr(address) => address.script_pubkey().into(),
        }
    }

    /// Address representation; fails for `pk(…)` outputs which do not have
    /// one.
    pub fn address(&self, network: Network) -> Result<Address, PaymentError> {
        match self {
            Payment::Pk(_) => Err(PaymentError::NoAddress),
            Payment::Pkh(pk) => Ok(Address::p2pkh(pk, network)),
            Payment::Wpkh(pk) => {
                Ok(Address::p2wpkh(pk, network).expect("uncompressed key"))
            }
            Payment::ShWpkh(pk) => {
                Ok(Address::p2shwpkh(pk, network).expect("uncompressed key"))
            }
            Payment::Sh(redeem) => {
                Ok(Address::p2sh(redeem.as_inner(), network)
                    .expect("redeem script within size limits"))
            }
            Payment::Wsh(witness) => Ok(Address::p2wsh(witness.as_inner(), network)),
            Payment::ShWsh(witness) => Ok(Address::p2shwsh(witness.as_inner(), network)),
            Payment::Addr(address) => Ok(address.clone()),
        }
    }

    /// The inner redeem script for `sh`-wrapped structures
    pub fn redeem_script(&self) -> Option<RedeemScript> {
        match self {
            Payment::ShWpkh(pk) => Some(RedeemScript::from_inner(Script::new_v0_p2wpkh(
                &pk.wpubkey_hash().expect("uncompressed key"),
            ))),
            Payment::Sh(redeem) => Some(redeem.clone()),
            Payment::ShWsh(witness) => Some(witness.to_redeem_script()),
            _ => None,
        }
    }

    /// The witness script for `wsh`-backed structures
    pub fn witness_script(&self) -> Option<WitnessScript> {
        match self {
            Payment::Wsh(witness) | Payment::ShWsh(witness) => Some(witness.clone()),
            _ => None,
        }
    }

    /// Whether spending uses the segregated witness; unknowable for
    /// address-only payments.
    pub fn is_segwit(&self) -> Option<bool> {
        match self {
            Payment::Pk(_) | Payment::Pkh(_) | Payment::Sh(_) => Some(false),
            Payment::Wpkh(_)
            | Payment::ShWpkh(_)
            | Payment::Wsh(_)
            | Payment::ShWsh(_) => Some(true),
            Payment::Addr(_) => None,
        }
    }
}

fn address_network_ok(address: &Address, network: Network) -> bool {
    match address.network {
        Network::Bitcoin => network == Network::Bitcoin,
        Network::Regtest => network == Network::Regtest,
        // testnet-encoded addresses are shared by testnet and signet;
        // base58 forms are additionally valid on regtest
        Network::Testnet | Network::Signet => match address.payload {
            Payload::PubkeyHash(_) | Payload::ScriptHash(_) => network != Network::Bitcoin,
            _ => matches!(network, Network::Testnet | Network::Signet),
        },
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use amplify::hex::ToHex;

    use super::*;
    use crate::keys::test_helpers::gen_pubkeys;

    #[test]
    fn pkh_script_template() {
        let pk = gen_pubkeys(1)[0];
        let spk = Payment::Pkh(pk).script_pubkey();
        let bytes = spk.as_inner().to_bytes();
        assert_eq!(bytes.len(), 25);
        assert_eq!(&bytes[..3], &[0x76, 0xa9, 0x14]);
        assert_eq!(&bytes[23..], &[0x88, 0xac]);
    }

    #[test]
    fn nested_wpkh_layers() {
        let pk = gen_pubkeys(1)[0];
        let payment = Payment::ShWpkh(pk);
        let spk = payment.script_pubkey();
        let bytes = spk.as_inner().to_bytes();
        assert_eq!(bytes.len(), 23);
        assert_eq!(&bytes[..2], &[0xa9, 0x14]);
        assert_eq!(bytes[22], 0x87);

        let redeem = payment.redeem_script().unwrap();
        assert!(redeem.as_inner().is_v0_p2wpkh());
        assert_eq!(redeem.to_p2sh(), spk);
        assert_eq!(payment.is_segwit(), Some(true));
    }

    #[test]
    fn bip173_witness_program() {
        let address =
            Address::from_str("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4").unwrap();
        let payment = Payment::with_address(address.clone(), Network::Bitcoin).unwrap();
        assert_eq!(
            payment.script_pubkey().as_inner().to_bytes().to_hex(),
            "0014751e76e8199196d454941c45d1b3a323f1433bd6"
        );
        assert_eq!(payment.address(Network::Bitcoin).unwrap(), address);
        assert_eq!(payment.is_segwit(), None);
    }

    #[test]
    fn taproot_recognized_other_programs_rejected() {
        let taproot = Address {
            network: Network::Bitcoin,
            payload: Payload::WitnessProgram {
                version: WitnessVersion::V1,
                program: vec![7u8; 32],
            },
        };
        Payment::with_address(taproot, Network::Bitcoin).unwrap();

        let unknown = Address {
            network: Network::Bitcoin,
            payload: Payload::WitnessProgram {
                version: WitnessVersion::V2,
                program: vec![7u8; 32],
            },
        };
        assert!(matches!(
            Payment::with_address(unknown, Network::Bitcoin),
            Err(PaymentError::UnsupportedTemplate(_))
        ));
    }

    #[test]
    fn network_discipline() {
        let address =
            Address::from_str("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4").unwrap();
        assert!(matches!(
            Payment::with_address(address, Network::Testnet),
            Err(PaymentError::AddressNetworkMismatch(..))
        ));

        let base58_testnet = Address::from_str("mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn").unwrap();
        Payment::with_address(base58_testnet.clone(), Network::Regtest).unwrap();
        Payment::with_address(base58_testnet, Network::Testnet).unwrap();
    }

    #[test]
    fn no_address_for_bare_pk() {
        let pk = gen_pubkeys(1)[0];
        assert_eq!(
            Payment::Pk(pk).address(Network::Bitcoin),
            Err(PaymentError::NoAddress)
        );
    }
}
