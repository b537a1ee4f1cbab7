use wallet_core::config::Network;
use wallet_core::ecc::{self, KeyPair};
use wallet_core::hd::mnemonic::Mnemonic;
use wallet_core::hd::{ChildNumber, ExtendedKey};
use wallet_core::serialize::{TlvReader, TlvWriter};

#[test]
fn mnemonic_to_master_key_to_address() {
    let mnemonic = Mnemonic::from_entropy(&[0x7fu8; 16]).unwrap();
    let seed = mnemonic.to_seed("");
    let master = ExtendedKey::master(&seed).unwrap();

    let receive = master
        .derive_path(&[
            ChildNumber::hardened(44),
            ChildNumber::hardened(0),
            ChildNumber::hardened(0),
            ChildNumber::normal(0),
            ChildNumber::normal(0),
        ])
        .unwrap();

    let secret = receive.secret.expect("private derivation keeps the secret");
    let keypair = KeyPair::from_secret(secret, true);
    let address = keypair.address(Network::Mainnet);
    assert!(address.starts_with('1'));

    // Neutering the same node must yield the same address without the secret.
    let neutered = receive.neuter();
    assert!(neutered.secret.is_none());
    let watching = KeyPair::watching(neutered.public, true);
    assert_eq!(watching.address(Network::Mainnet), address);
}

#[test]
fn sign_and_verify_round_trip_across_modules() {
    let keypair = KeyPair::generate();
    let digest = ecc::sha256d(b"transaction digest stand-in");
    let sig = ecc::sign_der(&keypair.secret.unwrap(), &digest, 0x01).unwrap();
    assert!(ecc::is_canonical_signature(&sig));
    ecc::verify_der(&keypair.public, &digest, &sig).unwrap();
}

#[test]
fn extended_key_round_trips_through_base58check_strings() {
    let mnemonic = Mnemonic::from_entropy(&[0x11u8; 32]).unwrap();
    let seed = mnemonic.to_seed("correct horse battery staple");
    let master = ExtendedKey::master(&seed).unwrap();
    let child = master.derive_child(ChildNumber::hardened(0)).unwrap();

    let xprv = child.to_xprv_string(Network::Mainnet).unwrap();
    let restored = ExtendedKey::from_xprv_string(&xprv).unwrap();
    assert_eq!(restored.secret.unwrap().secret_bytes(), child.secret.unwrap().secret_bytes());

    let xpub = child.neuter().to_xpub_string(Network::Mainnet);
    let restored_pub = ExtendedKey::from_xpub_string(&xpub).unwrap();
    assert_eq!(restored_pub.public, child.public);
}

#[test]
fn tlv_framing_survives_mixed_mandatory_and_optional_fields() {
    let mut writer = TlvWriter::new();
    writer.write_u64(1, true, 1_234_567);
    writer.write_str(2, false, "a note nobody has to understand");
    writer.write_u32(3, true, 9);
    let bytes = writer.into_bytes();

    let mut reader = TlvReader::new(&bytes);
    let fields = reader.read_all(&[1, 2, 3], true).unwrap();
    assert_eq!(fields.len(), 3);
    assert_eq!(fields[0].tag, 1);
    assert!(fields[0].mandatory);
    assert!(!fields[1].mandatory);
}
