use shared::{Account, Amount, ChainError, Hash256, Result};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::block::{is_block_hash_valid, Block, BlockRecord, BLOCK_REWARD};
use crate::genesis::{
    block_db_file_path, genesis_file_path, init_data_dir_if_not_exists, load_genesis, GENESIS_JSON,
};
use crate::transaction::Tx;

/// Estado do ledger: saldos por conta, ponteiro para o topo da cadeia e o
/// arquivo de log de blocos aberto para append.
///
/// `latest_block == None` significa cadeia vazia (só a gênese de saldos);
/// nesse caso `latest_block_hash` é o hash zero.
#[derive(Debug)]
pub struct State {
    balances: HashMap<Account, Amount>,
    latest_block: Option<Block>,
    latest_block_hash: Hash256,
    archived_txs: HashSet<Hash256>,
    db_file: File,
}

/// Resultado da validação de um bloco contra uma cópia sombra dos saldos
struct AppliedBlock {
    hash: Hash256,
    balances: HashMap<Account, Amount>,
    tx_hashes: Vec<Hash256>,
}

impl State {
    /// Carrega o estado do disco: prepara o diretório de dados, inicializa os
    /// saldos da gênese e reaplica cada linha de `block.db` com validação
    /// completa. Qualquer bloco inválido durante o replay é fatal.
    ///
    /// # Errors
    ///
    /// Retorna erro em falhas de I/O, gênese malformada ou log corrompido
    pub fn new_from_disk(data_dir: &Path) -> Result<Self> {
        init_data_dir_if_not_exists(data_dir, GENESIS_JSON.as_bytes())?;
        let genesis = load_genesis(&genesis_file_path(data_dir))?;

        let db_file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(block_db_file_path(data_dir))
            .map_err(|e| ChainError::Io(e.to_string()))?;

        let mut state = Self {
            balances: genesis.balances,
            latest_block: None,
            latest_block_hash: Hash256::zero(),
            archived_txs: HashSet::new(),
            db_file,
        };

        let reader = BufReader::new(
            state
                .db_file
                .try_clone()
                .map_err(|e| ChainError::Io(e.to_string()))?,
        );
        for line in reader.lines() {
            let line = line.map_err(|e| ChainError::Io(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: BlockRecord = serde_json::from_str(&line)
                .map_err(|e| ChainError::Serialization(e.to_string()))?;
            state.replay(record)?;
        }

        Ok(state)
    }

    /// Valida o bloco, grava a linha em `block.db` com fsync e só então
    /// atualiza saldos e ponteiros. Falha não altera o estado.
    ///
    /// # Errors
    ///
    /// Retorna erro se o bloco for inválido ou se a escrita no log falhar
    pub fn add_block(&mut self, block: Block) -> Result<Hash256> {
        let applied = self.apply_block(&block)?;

        let record = BlockRecord {
            hash: applied.hash,
            block,
        };
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| ChainError::Serialization(e.to_string()))?;
        line.push(b'\n');
        self.db_file
            .write_all(&line)
            .map_err(|e| ChainError::Io(e.to_string()))?;
        self.db_file
            .sync_all()
            .map_err(|e| ChainError::Io(e.to_string()))?;

        self.commit(record.block, applied);
        Ok(self.latest_block_hash)
    }

    /// Reaplica um registro já persistido, conferindo o hash gravado
    fn replay(&mut self, record: BlockRecord) -> Result<()> {
        let applied = self.apply_block(&record.block)?;
        if applied.hash != record.hash {
            return Err(ChainError::InvalidBlock(format!(
                "stored hash {} does not match computed hash {}",
                record.hash, applied.hash
            )));
        }
        self.commit(record.block, applied);
        Ok(())
    }

    fn commit(&mut self, block: Block, applied: AppliedBlock) {
        self.balances = applied.balances;
        self.latest_block_hash = applied.hash;
        self.latest_block = Some(block);
        self.archived_txs.extend(applied.tx_hashes);
    }

    /// Validação completa contra o topo atual, aplicada numa cópia sombra
    /// dos saldos (o estado real só muda no commit)
    fn apply_block(&self, block: &Block) -> Result<AppliedBlock> {
        match &self.latest_block {
            Some(latest) => {
                let expected = latest.header.number + 1;
                if block.header.number != expected {
                    return Err(ChainError::InvalidBlock(format!(
                        "expected block number {expected}, got {}",
                        block.header.number
                    )));
                }
                if block.header.parent != self.latest_block_hash {
                    return Err(ChainError::InvalidBlock(format!(
                        "parent {} does not match latest block {}",
                        block.header.parent, self.latest_block_hash
                    )));
                }
                if block.header.time < latest.header.time {
                    return Err(ChainError::InvalidBlock(
                        "block time is older than the latest block".to_string(),
                    ));
                }
            }
            None => {
                if block.header.number != 0 {
                    return Err(ChainError::InvalidBlock(format!(
                        "expected block number 0, got {}",
                        block.header.number
                    )));
                }
                if !block.header.parent.is_zero() {
                    return Err(ChainError::InvalidBlock(
                        "first block must have the zero parent".to_string(),
                    ));
                }
            }
        }

        let hash = block.hash()?;
        if !is_block_hash_valid(&hash) {
            return Err(ChainError::InvalidBlock(format!(
                "hash {hash} does not satisfy the proof-of-work difficulty"
            )));
        }

        let mut balances = self.balances.clone();
        let mut tx_hashes = Vec::with_capacity(block.txs.len());
        for signed in &block.txs {
            if !signed.is_authentic()? {
                return Err(ChainError::UnauthenticTransaction(
                    signed.tx.from.to_string(),
                ));
            }
            apply_tx(&mut balances, &signed.tx)?;
            tx_hashes.push(signed.hash()?);
        }

        // Recompensa implícita do minerador; nenhum débito correspondente
        credit(&mut balances, block.header.miner, BLOCK_REWARD)?;

        Ok(AppliedBlock {
            hash,
            balances,
            tx_hashes,
        })
    }

    /// Último bloco aplicado, se houver
    #[must_use]
    pub fn latest_block(&self) -> Option<&Block> {
        self.latest_block.as_ref()
    }

    /// Hash do topo da cadeia; zero quando a cadeia está vazia
    #[must_use]
    pub const fn latest_block_hash(&self) -> Hash256 {
        self.latest_block_hash
    }

    #[must_use]
    pub fn has_genesis_block(&self) -> bool {
        self.latest_block.is_some()
    }

    /// Número que o próximo bloco deve carregar
    #[must_use]
    pub fn next_block_number(&self) -> u64 {
        self.latest_block
            .as_ref()
            .map_or(0, |block| block.header.number + 1)
    }

    #[must_use]
    pub const fn balances(&self) -> &HashMap<Account, Amount> {
        &self.balances
    }

    /// Cópia dos saldos para consultas fora do coordenador
    #[must_use]
    pub fn balances_snapshot(&self) -> HashMap<Account, Amount> {
        self.balances.clone()
    }

    /// Verifica se uma transação assinada já está na cadeia
    #[must_use]
    pub fn contains_tx(&self, hash: &Hash256) -> bool {
        self.archived_txs.contains(hash)
    }
}

impl Drop for State {
    fn drop(&mut self) {
        let _ = self.db_file.sync_all();
    }
}

/// Aplica uma transação aos saldos: débito de `from` (exceto recompensas,
/// que não têm débito nem exigência de saldo) e crédito de `to`
fn apply_tx(balances: &mut HashMap<Account, Amount>, tx: &Tx) -> Result<()> {
    if !tx.is_reward() {
        let from_balance = balances.get(&tx.from).copied().unwrap_or(0);
        if tx.value > from_balance {
            return Err(ChainError::InsufficientFunds {
                account: tx.from.to_string(),
                balance: from_balance,
                value: tx.value,
            });
        }
        balances.insert(tx.from, from_balance - tx.value);
    }
    credit(balances, tx.to, tx.value)
}

fn credit(balances: &mut HashMap<Account, Amount>, account: Account, value: Amount) -> Result<()> {
    let balance = balances.entry(account).or_insert(0);
    *balance = balance
        .checked_add(value)
        .ok_or_else(|| ChainError::BalanceOverflow(account.to_string()))?;
    Ok(())
}

/// Lê de `block.db` os blocos estritamente depois de `from_hash`, na ordem da
/// cadeia. O hash zero significa "desde o início"; um hash desconhecido
/// resulta numa lista vazia.
///
/// # Errors
///
/// Retorna erro em falhas de I/O ou linhas corrompidas
pub fn blocks_after(data_dir: &Path, from_hash: Hash256) -> Result<Vec<Block>> {
    let file =
        File::open(block_db_file_path(data_dir)).map_err(|e| ChainError::Io(e.to_string()))?;

    let mut collecting = from_hash.is_zero();
    let mut blocks = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ChainError::Io(e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: BlockRecord =
            serde_json::from_str(&line).map_err(|e| ChainError::Serialization(e.to_string()))?;
        if collecting {
            blocks.push(record.block);
        } else if record.hash == from_hash {
            collecting = true;
        }
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::Genesis;
    use crate::mining::{mine, PendingBlock};
    use crate::transaction::{SignedTx, REWARD_DATA};
    use chrono::Utc;
    use shared::KeyPair;
    use std::path::PathBuf;
    use std::str::FromStr;
    use std::sync::atomic::AtomicBool;

    fn funded_datadir(account: Account, amount: Amount) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let genesis = Genesis {
            genesis_time: Utc::now(),
            chain_id: "minichain-test".to_string(),
            balances: HashMap::from([(account, amount)]),
        };
        let bytes = serde_json::to_vec(&genesis).unwrap();
        init_data_dir_if_not_exists(dir.path(), &bytes).unwrap();
        let path = dir.path().to_path_buf();
        (dir, path)
    }

    fn mined_block(state: &State, miner: &KeyPair, txs: Vec<SignedTx>) -> Block {
        let pending = PendingBlock::new(
            state.latest_block_hash(),
            state.next_block_number(),
            miner.account,
            txs,
        );
        mine(&pending, &AtomicBool::new(false)).unwrap()
    }

    fn transfer(from: &KeyPair, to: Account, value: u64) -> SignedTx {
        SignedTx::sign(Tx::new(from.account, to, value, ""), &from.secret).unwrap()
    }

    #[test]
    fn test_fresh_state_matches_embedded_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let state = State::new_from_disk(dir.path()).unwrap();

        let funded = Account::from_str("0x22ba1F80452E6220c7cc6ea2D1e3EEDDaC5F694A").unwrap();
        assert_eq!(state.balances()[&funded], 1_000_000);
        assert!(state.latest_block_hash().is_zero());
        assert!(!state.has_genesis_block());
        assert_eq!(state.next_block_number(), 0);
    }

    #[test]
    fn test_add_block_updates_balances_and_tip() {
        let sender = KeyPair::generate();
        let receiver = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        let block = mined_block(&state, &sender, vec![transfer(&sender, receiver.account, 1)]);
        let hash = state.add_block(block.clone()).unwrap();

        assert_eq!(state.latest_block_hash(), hash);
        assert_eq!(state.latest_block().unwrap().header.number, 0);
        assert_eq!(state.next_block_number(), 1);
        // Remetente também é o minerador: -1 da transferência, +100 de recompensa
        assert_eq!(state.balances()[&sender.account], 1_000_000 - 1 + BLOCK_REWARD);
        assert_eq!(state.balances()[&receiver.account], 1);
        assert!(state.contains_tx(&block.txs[0].hash().unwrap()));
    }

    #[test]
    fn test_replay_reproduces_live_state() {
        let sender = KeyPair::generate();
        let receiver = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);

        let (live_balances, live_hash) = {
            let mut state = State::new_from_disk(&data_dir).unwrap();
            let block0 = mined_block(&state, &sender, vec![transfer(&sender, receiver.account, 10)]);
            state.add_block(block0).unwrap();
            let block1 = mined_block(&state, &sender, vec![transfer(&sender, receiver.account, 20)]);
            state.add_block(block1).unwrap();
            (state.balances_snapshot(), state.latest_block_hash())
        };

        let replayed = State::new_from_disk(&data_dir).unwrap();
        assert_eq!(replayed.balances(), &live_balances);
        assert_eq!(replayed.latest_block_hash(), live_hash);
        assert_eq!(replayed.next_block_number(), 2);
    }

    #[test]
    fn test_conservation_of_funds() {
        let sender = KeyPair::generate();
        let receiver = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        let total_before: u64 = state.balances().values().sum();

        let block0 = mined_block(&state, &sender, vec![transfer(&sender, receiver.account, 500)]);
        state.add_block(block0).unwrap();
        let block1 = mined_block(&state, &receiver, vec![transfer(&receiver, sender.account, 80)]);
        state.add_block(block1).unwrap();

        let total_after: u64 = state.balances().values().sum();
        assert_eq!(total_after, total_before + 2 * BLOCK_REWARD);
    }

    #[test]
    fn test_wrong_parent_is_rejected() {
        let sender = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        let mut block = mined_block(&state, &sender, vec![transfer(&sender, sender.account, 1)]);
        block.header.parent = Hash256::keccak256(b"bogus parent");

        let before = state.balances_snapshot();
        assert!(matches!(
            state.add_block(block),
            Err(ChainError::InvalidBlock(_))
        ));
        assert_eq!(state.balances(), &before);
        assert!(state.latest_block_hash().is_zero());
    }

    #[test]
    fn test_wrong_number_is_rejected() {
        let sender = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        let pending = PendingBlock::new(
            Hash256::zero(),
            7,
            sender.account,
            vec![transfer(&sender, sender.account, 1)],
        );
        let block = mine(&pending, &AtomicBool::new(false)).unwrap();
        assert!(matches!(
            state.add_block(block),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_failed_pow_is_rejected() {
        let sender = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        let mut block = mined_block(&state, &sender, vec![transfer(&sender, sender.account, 1)]);
        // Invalida a prova de trabalho sem quebrar a ligação com o topo
        loop {
            block.header.nonce = block.header.nonce.wrapping_add(1);
            if !is_block_hash_valid(&block.hash().unwrap()) {
                break;
            }
        }

        assert!(matches!(
            state.add_block(block),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_non_monotonic_time_is_rejected() {
        let sender = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        let block0 = mined_block(&state, &sender, vec![transfer(&sender, sender.account, 1)]);
        state.add_block(block0).unwrap();

        // Minera à mão um bloco com timestamp bem anterior ao bloco 0
        let header = crate::block::BlockHeader::new(
            state.latest_block_hash(),
            state.next_block_number(),
            0,
            1,
            sender.account,
        );
        let mut block1 = Block::new(header, vec![transfer(&sender, sender.account, 2)]);
        while !is_block_hash_valid(&block1.hash().unwrap()) {
            block1.header.nonce = block1.header.nonce.wrapping_add(1);
        }

        assert!(matches!(
            state.add_block(block1),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_insufficient_funds_is_rejected() {
        let sender = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 10);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        let block = mined_block(&state, &sender, vec![transfer(&sender, sender.account, 11)]);
        assert!(matches!(
            state.add_block(block),
            Err(ChainError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_unauthentic_tx_is_rejected() {
        let sender = KeyPair::generate();
        let intruder = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        // Assinada pelo intruso em nome do remetente
        let forged =
            SignedTx::sign(Tx::new(sender.account, intruder.account, 5, ""), &intruder.secret)
                .unwrap();
        let block = mined_block(&state, &sender, vec![forged]);

        assert!(matches!(
            state.add_block(block),
            Err(ChainError::UnauthenticTransaction(_))
        ));
    }

    #[test]
    fn test_reward_tx_credits_without_debit() {
        let miner = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(miner.account, 0);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        let reward = SignedTx::sign(
            Tx::new(miner.account, miner.account, 700, REWARD_DATA),
            &miner.secret,
        )
        .unwrap();
        let block = mined_block(&state, &miner, vec![reward]);
        state.add_block(block).unwrap();

        assert_eq!(state.balances()[&miner.account], 700 + BLOCK_REWARD);
    }

    #[test]
    fn test_blocks_after_walks_the_chain() {
        let sender = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);
        let mut state = State::new_from_disk(&data_dir).unwrap();

        let block0 = mined_block(&state, &sender, vec![transfer(&sender, sender.account, 1)]);
        let hash0 = state.add_block(block0).unwrap();
        let block1 = mined_block(&state, &sender, vec![transfer(&sender, sender.account, 2)]);
        state.add_block(block1).unwrap();

        let all = blocks_after(&data_dir, Hash256::zero()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].header.number, 0);
        assert_eq!(all[1].header.number, 1);

        let after_first = blocks_after(&data_dir, hash0).unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].header.number, 1);

        let unknown = blocks_after(&data_dir, Hash256::keccak256(b"unknown")).unwrap();
        assert!(unknown.is_empty());

        let after_tip = blocks_after(&data_dir, state.latest_block_hash()).unwrap();
        assert!(after_tip.is_empty());
    }

    #[test]
    fn test_corrupted_log_is_fatal() {
        let sender = KeyPair::generate();
        let (_guard, data_dir) = funded_datadir(sender.account, 1_000_000);
        {
            let mut state = State::new_from_disk(&data_dir).unwrap();
            let block = mined_block(&state, &sender, vec![transfer(&sender, sender.account, 1)]);
            state.add_block(block).unwrap();
        }

        // Adultera o hash gravado na primeira linha
        let db_path = block_db_file_path(&data_dir);
        let content = std::fs::read_to_string(&db_path).unwrap();
        let tampered = content.replacen("\"hash\":\"000", "\"hash\":\"fff", 1);
        assert_ne!(content, tampered);
        std::fs::write(&db_path, tampered).unwrap();

        assert!(State::new_from_disk(&data_dir).is_err());
    }
}
