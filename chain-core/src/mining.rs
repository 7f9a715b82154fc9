use shared::{now_unix, Account, ChainError, Hash256, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::block::{is_block_hash_valid, Block, BlockHeader};
use crate::transaction::SignedTx;

/// Intervalo mínimo entre logs de progresso da mineração
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Bloco candidato ainda sem prova de trabalho
#[derive(Debug, Clone)]
pub struct PendingBlock {
    pub parent: Hash256,
    pub number: u64,
    pub miner: Account,
    pub txs: Vec<SignedTx>,
}

impl PendingBlock {
    /// Cria um bloco pendente a partir de um snapshot do topo da cadeia
    #[must_use]
    pub const fn new(parent: Hash256, number: u64, miner: Account, txs: Vec<SignedTx>) -> Self {
        Self {
            parent,
            number,
            miner,
            txs,
        }
    }
}

/// Busca um nonce que satisfaça o predicado de prova de trabalho.
///
/// Parte de um nonce aleatório e incrementa com wrap; cada candidato é
/// carimbado com o horário corrente. O flag de cancelamento é consultado a
/// cada iteração e interrompe a busca sem efeitos colaterais. A função é pura
/// em relação ao estado externo: quem chama garante que parent, número e
/// transações ainda se aplicam quando o resultado for usado.
///
/// # Errors
///
/// `MiningCancelled` quando o flag é acionado; `InvalidBlock` para uma lista
/// de transações vazia; erro de serialização se o hashing falhar
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)] // taxa de hash é apenas informativa
pub fn mine(pending: &PendingBlock, cancel: &AtomicBool) -> Result<Block> {
    if pending.txs.is_empty() {
        return Err(ChainError::InvalidBlock(
            "refusing to mine a block with no transactions".to_string(),
        ));
    }

    let start_nonce: u32 = rand::random();
    let mut nonce = start_nonce;
    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut attempts: u64 = 0;

    let header = BlockHeader::new(
        pending.parent,
        pending.number,
        start_nonce,
        now_unix(),
        pending.miner,
    );
    let mut block = Block::new(header, pending.txs.clone());

    loop {
        if cancel.load(Ordering::Relaxed) {
            debug!(number = pending.number, attempts, "mining attempt cancelled");
            return Err(ChainError::MiningCancelled);
        }

        block.header.nonce = nonce;
        block.header.time = now_unix();
        attempts += 1;

        let hash = block.hash()?;
        if is_block_hash_valid(&hash) {
            info!(
                number = block.header.number,
                nonce,
                attempts,
                hash = %hash,
                "block mined"
            );
            return Ok(block);
        }

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            let rate = attempts as f64 / started.elapsed().as_secs_f64();
            info!(attempts, hashes_per_second = rate as u64, "mining in progress");
            last_report = Instant::now();
        }

        nonce = nonce.wrapping_add(1);
    }
}
