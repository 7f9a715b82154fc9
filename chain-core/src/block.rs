use serde::{Deserialize, Serialize};
use shared::{Account, ChainError, Hash256, Result, Timestamp};

use crate::transaction::SignedTx;

/// Recompensa creditada ao minerador por bloco aplicado
pub const BLOCK_REWARD: u64 = 100;

/// Dificuldade fixa: bits zero à esquerda exigidos no hash do bloco
/// (12 bits, ou seja, três zeros hexadecimais)
pub const MINING_DIFFICULTY: u32 = 12;

/// Cabeçalho do bloco
///
/// A ordem dos campos é a forma canônica usada para hashing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash do bloco anterior; zero para o primeiro bloco
    pub parent: Hash256,
    /// Posição na cadeia, começando em 0
    pub number: u64,
    /// Nonce encontrado pela mineração
    pub nonce: u32,
    /// Timestamp Unix de criação
    pub time: Timestamp,
    /// Conta que recebe a recompensa do bloco
    pub miner: Account,
}

impl BlockHeader {
    /// Cria um novo cabeçalho de bloco
    #[must_use]
    pub const fn new(
        parent: Hash256,
        number: u64,
        nonce: u32,
        time: Timestamp,
        miner: Account,
    ) -> Self {
        Self {
            parent,
            number,
            nonce,
            time,
            miner,
        }
    }
}

/// Bloco completo: cabeçalho e lista ordenada de transações assinadas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<SignedTx>,
}

impl Block {
    /// Cria um novo bloco
    #[must_use]
    pub const fn new(header: BlockHeader, txs: Vec<SignedTx>) -> Self {
        Self { header, txs }
    }

    /// Hash Keccak-256 da forma canônica do bloco inteiro
    ///
    /// # Errors
    ///
    /// Retorna erro se a serialização falhar
    pub fn hash(&self) -> Result<Hash256> {
        let encoded =
            serde_json::to_vec(self).map_err(|e| ChainError::Serialization(e.to_string()))?;
        Ok(Hash256::keccak256(&encoded))
    }
}

/// Verifica o predicado de prova de trabalho
#[must_use]
pub fn is_block_hash_valid(hash: &Hash256) -> bool {
    hash.meets_difficulty(MINING_DIFFICULTY)
}

/// Linha persistida em `block.db`: o hash pré-calculado e o bloco
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: Hash256,
    pub block: Block,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Tx;
    use shared::KeyPair;

    fn sample_block() -> Block {
        let keypair = KeyPair::generate();
        let tx = Tx::new(keypair.account, Account::zero(), 1, "");
        let signed = SignedTx::sign(tx, &keypair.secret).unwrap();
        Block::new(
            BlockHeader::new(Hash256::zero(), 0, 42, 1_700_000_000, keypair.account),
            vec![signed],
        )
    }

    #[test]
    fn test_block_hash_is_deterministic() {
        let block = sample_block();
        assert_eq!(block.hash().unwrap(), block.hash().unwrap());
    }

    #[test]
    fn test_nonce_changes_block_hash() {
        let block = sample_block();
        let mut other = block.clone();
        other.header.nonce = block.header.nonce.wrapping_add(1);
        assert_ne!(block.hash().unwrap(), other.hash().unwrap());
    }

    #[test]
    fn test_header_canonical_encoding_is_pinned() {
        let header = BlockHeader::new(
            Hash256::zero(),
            3,
            99,
            1_700_000_000,
            Account::from_bytes([0xab; 20]),
        );
        let encoded = serde_json::to_string(&header).unwrap();
        assert_eq!(
            encoded,
            "{\"parent\":\"0000000000000000000000000000000000000000000000000000000000000000\",\
             \"number\":3,\"nonce\":99,\"time\":1700000000,\
             \"miner\":\"abababababababababababababababababababab\"}"
        );
    }

    #[test]
    fn test_block_round_trip() {
        let block = sample_block();
        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(block, back);
        assert_eq!(block.hash().unwrap(), back.hash().unwrap());
    }

    #[test]
    fn test_pow_predicate_boundary() {
        // Exatamente 12 bits zero
        let mut bytes = [0u8; 32];
        bytes[1] = 0x0f;
        bytes[2] = 0xff;
        assert!(is_block_hash_valid(&Hash256::from_bytes(bytes)));

        // 11 bits zero: reprovado
        let mut bytes = [0u8; 32];
        bytes[1] = 0x1f;
        assert!(!is_block_hash_valid(&Hash256::from_bytes(bytes)));
    }

    #[test]
    fn test_block_record_round_trip() {
        let block = sample_block();
        let record = BlockRecord {
            hash: block.hash().unwrap(),
            block,
        };
        let line = serde_json::to_string(&record).unwrap();
        let back: BlockRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.hash, back.block.hash().unwrap());
    }
}
