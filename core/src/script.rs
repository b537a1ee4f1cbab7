//! Output-script classification.
//!
//! A pure function from raw script bytes to a tagged variant. All pool and
//! coin-selection logic branches on the variant rather than re-inspecting
//! opcodes, per the Design Notes' "runtime type-dispatch on output scripts"
//! guidance. This is *not* a script interpreter: only the handful of
//! standard output forms spec.md names are recognised.

/// Classification of a transaction output script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptPubKey {
    /// `OP_DUP OP_HASH160 <20-byte hash> OP_EQUALVERIFY OP_CHECKSIG`
    PayToPubkeyHash([u8; 20]),
    /// `OP_HASH160 <20-byte hash> OP_EQUAL`
    PayToScriptHash([u8; 20]),
    /// `<pubkey> OP_CHECKSIG`
    PayToPubkey(Vec<u8>),
    /// Anything else; classification stops here (no opcode interpreter).
    Other(Vec<u8>),
}

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const OP_EQUAL: u8 = 0x87;

impl ScriptPubKey {
    /// Classifies a raw script, falling back to [`ScriptPubKey::Other`] for
    /// anything not matching a recognised standard form.
    pub fn classify(script: &[u8]) -> Self {
        if script.len() == 25
            && script[0] == OP_DUP
            && script[1] == OP_HASH160
            && script[2] == 0x14
            && script[23] == OP_EQUALVERIFY
            && script[24] == OP_CHECKSIG
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[3..23]);
            return ScriptPubKey::PayToPubkeyHash(hash);
        }
        if script.len() == 23
            && script[0] == OP_HASH160
            && script[1] == 0x14
            && script[22] == OP_EQUAL
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&script[2..22]);
            return ScriptPubKey::PayToScriptHash(hash);
        }
        if (script.len() == 35 || script.len() == 67)
            && script[0] as usize == script.len() - 2
            && script[script.len() - 1] == OP_CHECKSIG
        {
            return ScriptPubKey::PayToPubkey(script[1..script.len() - 1].to_vec());
        }
        ScriptPubKey::Other(script.to_vec())
    }

    /// Builds the canonical P2PKH script for `pubkey_hash`.
    pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
        let mut out = Vec::with_capacity(25);
        out.push(OP_DUP);
        out.push(OP_HASH160);
        out.push(0x14);
        out.extend_from_slice(pubkey_hash);
        out.push(OP_EQUALVERIFY);
        out.push(OP_CHECKSIG);
        out
    }

    /// Builds the canonical P2SH script for `script_hash`.
    pub fn p2sh_script(script_hash: &[u8; 20]) -> Vec<u8> {
        let mut out = Vec::with_capacity(23);
        out.push(OP_HASH160);
        out.push(0x14);
        out.extend_from_slice(script_hash);
        out.push(OP_EQUAL);
        out
    }

    /// True if this output could plausibly belong to a wallet (i.e. it is
    /// one of the recognised standard forms).
    pub fn is_standard(&self) -> bool {
        !matches!(self, ScriptPubKey::Other(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_p2pkh() {
        let hash = [7u8; 20];
        let script = ScriptPubKey::p2pkh_script(&hash);
        assert_eq!(ScriptPubKey::classify(&script), ScriptPubKey::PayToPubkeyHash(hash));
    }

    #[test]
    fn classifies_p2sh() {
        let hash = [9u8; 20];
        let script = ScriptPubKey::p2sh_script(&hash);
        assert_eq!(ScriptPubKey::classify(&script), ScriptPubKey::PayToScriptHash(hash));
    }

    #[test]
    fn unrecognised_script_is_other() {
        let script = vec![0x6a, 0x04, 1, 2, 3, 4]; // OP_RETURN push
        assert!(!ScriptPubKey::classify(&script).is_standard());
    }
}
