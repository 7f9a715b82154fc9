use serde::{Deserialize, Serialize};
use shared::{
    now_unix, recover_account, sign_digest, Account, ChainError, Hash256, Result, SecretKey,
    Timestamp,
};

/// Marcador de transação de recompensa no campo `data`
pub const REWARD_DATA: &str = "reward";

/// Transação não assinada
///
/// A ordem dos campos é a forma canônica usada para hashing e assinatura;
/// mudá-la quebra o protocolo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    /// Conta de origem
    pub from: Account,
    /// Conta de destino
    pub to: Account,
    /// Valor transferido
    pub value: u64,
    /// Dados livres; `"reward"` marca uma transação de recompensa
    pub data: String,
    /// Timestamp Unix de criação
    pub time: Timestamp,
    /// Nonce opcional para distinguir transações idênticas
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
}

impl Tx {
    /// Cria uma transação carimbada com o horário atual
    #[must_use]
    pub fn new(from: Account, to: Account, value: u64, data: impl Into<String>) -> Self {
        Self {
            from,
            to,
            value,
            data: data.into(),
            time: now_unix(),
            nonce: None,
        }
    }

    /// Verifica se é uma transação de recompensa
    #[must_use]
    pub fn is_reward(&self) -> bool {
        self.data == REWARD_DATA
    }

    /// Forma canônica em bytes (JSON com campos em ordem fixa)
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ChainError::Serialization(e.to_string()))
    }

    /// Hash Keccak-256 da forma canônica
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn hash(&self) -> Result<Hash256> {
        Ok(Hash256::keccak256(&self.encode()?))
    }
}

/// Transação assinada: os campos da transação seguidos da assinatura
/// recuperável de 65 bytes sobre o hash da transação não assinada
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    #[serde(flatten)]
    pub tx: Tx,
    #[serde(with = "hex_signature")]
    pub signature: Vec<u8>,
}

impl SignedTx {
    /// Assina a transação com a chave secreta fornecida
    ///
    /// # Errors
    ///
    /// Retorna erro se o hash da transação não puder ser calculado
    pub fn sign(tx: Tx, secret: &SecretKey) -> Result<Self> {
        let digest = tx.hash()?;
        let signature = sign_digest(&digest, secret).to_vec();
        Ok(Self { tx, signature })
    }

    /// Hash da forma canônica incluindo a assinatura (chave de mempool)
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn hash(&self) -> Result<Hash256> {
        let encoded =
            serde_json::to_vec(self).map_err(|e| ChainError::Serialization(e.to_string()))?;
        Ok(Hash256::keccak256(&encoded))
    }

    /// Recupera o signatário e compara com o campo `from`
    ///
    /// # Errors
    ///
    /// Retorna `InvalidSignature` se a assinatura for malformada ou a
    /// recuperação falhar
    pub fn is_authentic(&self) -> Result<bool> {
        let digest = self.tx.hash()?;
        let recovered = recover_account(&digest, &self.signature)?;
        Ok(recovered == self.tx.from)
    }
}

mod hex_signature {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(stripped).map_err(Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::KeyPair;
    use std::str::FromStr;

    fn account(hex_addr: &str) -> Account {
        Account::from_str(hex_addr).unwrap()
    }

    #[test]
    fn test_canonical_encoding_is_pinned() {
        // O formato exato faz parte do protocolo: os hashes cruzam a rede
        let mut tx = Tx::new(
            account("0x22ba1f80452e6220c7cc6ea2d1e3eeddac5f694a"),
            account("0x6fdc0d8d15ae6b4ebf45c52fd2aafbcbb19a65c8"),
            1,
            "",
        );
        tx.time = 1_700_000_000;

        let encoded = String::from_utf8(tx.encode().unwrap()).unwrap();
        assert_eq!(
            encoded,
            "{\"from\":\"22ba1f80452e6220c7cc6ea2d1e3eeddac5f694a\",\
             \"to\":\"6fdc0d8d15ae6b4ebf45c52fd2aafbcbb19a65c8\",\
             \"value\":1,\"data\":\"\",\"time\":1700000000}"
        );

        tx.nonce = Some(7);
        let encoded = String::from_utf8(tx.encode().unwrap()).unwrap();
        assert!(encoded.ends_with("\"time\":1700000000,\"nonce\":7}"));
    }

    #[test]
    fn test_hash_ignores_field_order_of_input() {
        let json = "{\"time\":1700000000,\"data\":\"\",\"value\":3,\
                    \"to\":\"6fdc0d8d15ae6b4ebf45c52fd2aafbcbb19a65c8\",\
                    \"from\":\"22ba1f80452e6220c7cc6ea2d1e3eeddac5f694a\"}";
        let shuffled: Tx = serde_json::from_str(json).unwrap();

        let mut tx = Tx::new(
            account("0x22ba1f80452e6220c7cc6ea2d1e3eeddac5f694a"),
            account("0x6fdc0d8d15ae6b4ebf45c52fd2aafbcbb19a65c8"),
            3,
            "",
        );
        tx.time = 1_700_000_000;

        assert_eq!(shuffled, tx);
        assert_eq!(shuffled.hash().unwrap(), tx.hash().unwrap());
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let keypair = KeyPair::generate();
        let tx = Tx::new(keypair.account, Account::zero(), 42, "note");
        let signed = SignedTx::sign(tx, &keypair.secret).unwrap();

        let json = serde_json::to_string(&signed).unwrap();
        let back: SignedTx = serde_json::from_str(&json).unwrap();
        assert_eq!(signed, back);
        assert_eq!(signed.hash().unwrap(), back.hash().unwrap());
    }

    #[test]
    fn test_signed_tx_is_authentic() {
        let keypair = KeyPair::generate();
        let tx = Tx::new(keypair.account, Account::zero(), 1, "");
        let signed = SignedTx::sign(tx, &keypair.secret).unwrap();

        assert!(signed.is_authentic().unwrap());
    }

    #[test]
    fn test_tampered_tx_is_not_authentic() {
        let keypair = KeyPair::generate();
        let tx = Tx::new(keypair.account, Account::zero(), 1, "");
        let mut signed = SignedTx::sign(tx, &keypair.secret).unwrap();

        signed.tx.value = 1_000;
        match signed.is_authentic() {
            Ok(authentic) => assert!(!authentic),
            Err(ChainError::InvalidSignature) => (),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_third_party_signature_is_not_authentic() {
        let sender = KeyPair::generate();
        let intruder = KeyPair::generate();
        let tx = Tx::new(sender.account, Account::zero(), 1, "");

        // Assinada pela chave errada: o signatário recuperado não é `from`
        let signed = SignedTx::sign(tx, &intruder.secret).unwrap();
        assert!(!signed.is_authentic().unwrap());
    }

    #[test]
    fn test_truncated_signature_is_invalid() {
        let keypair = KeyPair::generate();
        let tx = Tx::new(keypair.account, Account::zero(), 1, "");
        let mut signed = SignedTx::sign(tx, &keypair.secret).unwrap();

        signed.signature.pop();
        assert!(matches!(
            signed.is_authentic(),
            Err(ChainError::InvalidSignature)
        ));
    }

    #[test]
    fn test_signed_hash_differs_from_unsigned_hash() {
        let keypair = KeyPair::generate();
        let tx = Tx::new(keypair.account, Account::zero(), 1, "");
        let unsigned_hash = tx.hash().unwrap();
        let signed = SignedTx::sign(tx, &keypair.secret).unwrap();

        assert_ne!(signed.hash().unwrap(), unsigned_hash);
    }

    #[test]
    fn test_reward_marker() {
        let tx = Tx::new(Account::zero(), Account::zero(), 100, REWARD_DATA);
        assert!(tx.is_reward());
        let tx = Tx::new(Account::zero(), Account::zero(), 100, "");
        assert!(!tx.is_reward());
    }
}
