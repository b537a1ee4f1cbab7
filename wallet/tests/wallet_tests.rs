use wallet_core::config::WalletConfig;
use wallet_core::ecc;
use wallet_core::hd::mnemonic::Mnemonic;

use wallet_engine::confidence::Source;
use wallet_engine::keychain::Purpose;
use wallet_engine::send::SendRequest;
use wallet_engine::tx::{Transaction, TxOut};
use wallet_engine::txpool::{BlockInfo, BlockKind};
use wallet_engine::Wallet;

fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).with_test_writer().try_init();
    });
}

fn test_wallet(entropy_byte: u8) -> Wallet {
    init_tracing();
    let mnemonic = Mnemonic::from_entropy(&[entropy_byte; 16]).unwrap();
    let seed = mnemonic.to_seed("");
    Wallet::from_seed(WalletConfig::default(), &seed, 0).unwrap()
}

fn pay_to_wallet(wallet: &Wallet, value: u64) -> Transaction {
    let address = wallet.current_address(Purpose::Receive).unwrap();
    let (_, hash) = ecc::base58check_decode(&address).unwrap();
    Transaction::new(vec![], vec![TxOut { value, script_pubkey: wallet_core::script::ScriptPubKey::p2pkh_script(&hash) }], 0)
}

#[test]
fn full_lifecycle_receive_confirm_send_confirm() {
    let wallet = test_wallet(1);

    let funding = pay_to_wallet(&wallet, 500_000);
    let funding_hash = funding.hash();
    wallet.receive_pending(funding, Source::NetworkBroadcast).unwrap();
    assert_eq!(wallet.pending_balance(), 500_000);

    let block1 = BlockInfo { hash: [1u8; 32], height: 100, transactions: vec![(funding_hash, 0)] };
    wallet.notify_transaction_in_block(funding_hash, &block1, BlockKind::BestChain, 0).unwrap();
    assert_eq!(wallet.confirmed_balance(), 500_000);
    assert_eq!(wallet.pending_balance(), 0);
    wallet.check_consistency().unwrap();

    // Spend part of it to an external address.
    let external = ecc::KeyPair::generate();
    let dest_script = wallet_core::script::ScriptPubKey::p2pkh_script(&external.pubkey_hash());
    let request = SendRequest::pay_to(dest_script, 150_000, 1_000);
    let sent = wallet.send(request).unwrap();
    let sent_hash = sent.hash();

    // The send is now our own pending transaction, spending the confirmed coin.
    assert!(wallet.pending_balance() > 0);
    wallet.check_consistency().unwrap();

    let block2 = BlockInfo { hash: [2u8; 32], height: 101, transactions: vec![(sent_hash, 0)] };
    wallet.notify_transaction_in_block(sent_hash, &block2, BlockKind::BestChain, 0).unwrap();
    wallet.check_consistency().unwrap();

    // Remaining balance is whatever change came back to us, all confirmed.
    assert!(wallet.confirmed_balance() < 500_000);
}

#[test]
fn reorganize_rewinds_a_confirmed_send_back_to_pending() {
    let wallet = test_wallet(2);

    let funding = pay_to_wallet(&wallet, 300_000);
    let funding_hash = funding.hash();
    wallet.receive_pending(funding, Source::NetworkBroadcast).unwrap();

    let block_funding = BlockInfo { hash: [9u8; 32], height: 200, transactions: vec![(funding_hash, 0)] };
    wallet.notify_transaction_in_block(funding_hash, &block_funding, BlockKind::BestChain, 0).unwrap();

    let dest = ecc::KeyPair::generate();
    let sent = wallet
        .send(SendRequest::pay_to(wallet_core::script::ScriptPubKey::p2pkh_script(&dest.pubkey_hash()), 50_000, 1_000))
        .unwrap();
    let sent_hash = sent.hash();

    let block_spend = BlockInfo { hash: [10u8; 32], height: 201, transactions: vec![(sent_hash, 0)] };
    wallet.notify_transaction_in_block(sent_hash, &block_spend, BlockKind::BestChain, 0).unwrap();
    wallet.check_consistency().unwrap();
    assert_eq!(wallet.pending_balance(), 0);

    // block_spend is orphaned with nothing confirming it in its place: the
    // send falls back to Pending rather than vanishing.
    wallet.reorganize(&[block_spend], &[]).unwrap();
    wallet.check_consistency().unwrap();
    assert!(wallet.pending_balance() > 0);
}

#[test]
fn encrypted_wallet_requires_derived_key_to_send() {
    let wallet = test_wallet(3);
    let funding = pay_to_wallet(&wallet, 200_000);
    let funding_hash = funding.hash();
    wallet.receive_pending(funding, Source::NetworkBroadcast).unwrap();
    let block1 = BlockInfo { hash: [5u8; 32], height: 50, transactions: vec![(funding_hash, 0)] };
    wallet.notify_transaction_in_block(funding_hash, &block1, BlockKind::BestChain, 0).unwrap();

    wallet.encrypt("correct horse battery staple").unwrap();
    assert!(wallet.is_encrypted());
    assert!(wallet.check_password("correct horse battery staple"));
    assert!(!wallet.check_password("wrong phrase"));

    let external = ecc::KeyPair::generate();
    let dest_script = wallet_core::script::ScriptPubKey::p2pkh_script(&external.pubkey_hash());

    let mut request = SendRequest::pay_to(dest_script.clone(), 50_000, 1_000);
    let without_key = wallet.send(request).unwrap_err();
    assert!(matches!(without_key, wallet_engine::WalletError::MissingPassword));

    let aes_key = wallet.derive_aes_key("correct horse battery staple").unwrap();
    request = SendRequest::pay_to(dest_script, 50_000, 1_000);
    request.aes_key = Some(aes_key);
    wallet.send(request).unwrap();
}

#[test]
fn save_and_reload_preserves_confirmed_and_pending_balances() {
    let wallet = test_wallet(4);
    let confirmed = pay_to_wallet(&wallet, 400_000);
    let confirmed_hash = confirmed.hash();
    wallet.receive_pending(confirmed, Source::NetworkBroadcast).unwrap();
    let block1 = BlockInfo { hash: [7u8; 32], height: 10, transactions: vec![(confirmed_hash, 0)] };
    wallet.notify_transaction_in_block(confirmed_hash, &block1, BlockKind::BestChain, 0).unwrap();

    let pending = pay_to_wallet(&wallet, 60_000);
    wallet.receive_pending(pending, Source::NetworkBroadcast).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reload.dat");
    wallet.save_to_file(&path).unwrap();

    let restored = Wallet::load_from_file(&path, WalletConfig::default()).unwrap();
    assert_eq!(restored.confirmed_balance(), 400_000);
    assert_eq!(restored.pending_balance(), 60_000);
    restored.check_consistency().unwrap();
}
