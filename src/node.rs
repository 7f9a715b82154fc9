//! Coordenador do nó: dono único do estado do ledger, do mempool e do
//! registro de peers.
//!
//! Todo o restante do processo (API HTTP, tarefa de sync, minerador) fala com
//! o coordenador por mensagens; nenhuma outra tarefa toca o estado. Blocos
//! sincronizados de peers têm prioridade de preempção: uma mineração em voo
//! cujo parent deixou de ser o topo é cancelada.

use chain_core::{mine, Block, PendingBlock, SignedTx, State};
use serde::{Deserialize, Serialize};
use shared::{Account, Amount, ChainError, Hash256, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::{http, sync};

pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Cadência com que o coordenador considera iniciar uma mineração
pub const MINING_INTERVAL_SECONDS: u64 = 10;

/// Cadência da tarefa de sincronização com peers
pub const SYNC_INTERVAL_SECONDS: u64 = 45;

/// Timeout das chamadas HTTP de saída para peers
pub const PEER_REQUEST_TIMEOUT_SECONDS: u64 = 30;

/// Peer conhecido, indexado por `ip:port` no registro
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerNode {
    pub ip: String,
    pub port: u16,
    pub is_bootstrap: bool,
    pub account: Account,
    pub is_active: bool,
}

impl PeerNode {
    #[must_use]
    pub const fn new(
        ip: String,
        port: u16,
        is_bootstrap: bool,
        account: Account,
        is_active: bool,
    ) -> Self {
        Self {
            ip,
            port,
            is_bootstrap,
            account,
            is_active,
        }
    }

    #[must_use]
    pub fn tcp_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }
}

/// Configuração de execução do nó
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub data_dir: PathBuf,
    pub ip: String,
    pub port: u16,
    pub miner: Account,
    pub bootstrap: Option<PeerNode>,
}

/// Resposta de `/node/status`, também usada pelo cliente de sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    #[serde(with = "hex_prefixed")]
    pub hash: Hash256,
    pub number: u64,
    pub known_peers: HashMap<String, PeerNode>,
    pub pending_txs_count: usize,
}

/// Resposta de `/node/sync`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub blocks: Vec<Block>,
}

// Campos de topo nas respostas HTTP levam o prefixo 0x; o FromStr aceita as
// duas formas na volta.
mod hex_prefixed {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use shared::Hash256;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(hash: &Hash256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hash.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash256, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_str(&s).map_err(Error::custom)
    }
}

/// Mensagens aceitas pelo mailbox do coordenador
#[derive(Debug)]
pub enum NodeMessage {
    PendingTx {
        tx: SignedTx,
        reply: oneshot::Sender<Result<Hash256>>,
    },
    SyncedBlock(Block),
    PeerDiscovered(PeerNode),
    MarkPeerActive {
        addr: String,
        active: bool,
    },
    GetBalances {
        reply: oneshot::Sender<(Hash256, HashMap<Account, Amount>)>,
    },
    GetStatus {
        reply: oneshot::Sender<NodeStatus>,
    },
}

/// Remetente clonável para falar com o coordenador
#[derive(Debug, Clone)]
pub struct NodeHandle {
    sender: mpsc::Sender<NodeMessage>,
}

impl NodeHandle {
    /// Submete uma transação assinada ao mempool
    ///
    /// # Errors
    ///
    /// Propaga a rejeição do coordenador, ou `Network` se o nó estiver parando
    pub async fn submit_tx(&self, tx: SignedTx) -> Result<Hash256> {
        let (reply, response) = oneshot::channel();
        self.send(NodeMessage::PendingTx { tx, reply }).await?;
        response
            .await
            .map_err(|_| ChainError::Network("node dropped the request".to_string()))?
    }

    /// Entrega um bloco recebido de um peer
    ///
    /// # Errors
    ///
    /// `Network` se o nó estiver parando
    pub async fn deliver_block(&self, block: Block) -> Result<()> {
        self.send(NodeMessage::SyncedBlock(block)).await
    }

    /// # Errors
    ///
    /// `Network` se o nó estiver parando
    pub async fn add_peer(&self, peer: PeerNode) -> Result<()> {
        self.send(NodeMessage::PeerDiscovered(peer)).await
    }

    /// # Errors
    ///
    /// `Network` se o nó estiver parando
    pub async fn mark_peer_active(&self, addr: String, active: bool) -> Result<()> {
        self.send(NodeMessage::MarkPeerActive { addr, active }).await
    }

    /// Snapshot dos saldos e do hash do topo
    ///
    /// # Errors
    ///
    /// `Network` se o nó estiver parando
    pub async fn balances(&self) -> Result<(Hash256, HashMap<Account, Amount>)> {
        let (reply, response) = oneshot::channel();
        self.send(NodeMessage::GetBalances { reply }).await?;
        response
            .await
            .map_err(|_| ChainError::Network("node dropped the request".to_string()))
    }

    /// Snapshot do status do nó
    ///
    /// # Errors
    ///
    /// `Network` se o nó estiver parando
    pub async fn status(&self) -> Result<NodeStatus> {
        let (reply, response) = oneshot::channel();
        self.send(NodeMessage::GetStatus { reply }).await?;
        response
            .await
            .map_err(|_| ChainError::Network("node dropped the request".to_string()))
    }

    async fn send(&self, message: NodeMessage) -> Result<()> {
        self.sender
            .send(message)
            .await
            .map_err(|_| ChainError::Network("node is shutting down".to_string()))
    }
}

/// O coordenador em si. Criado com `new`, consumido por `run`.
pub struct Node {
    config: NodeConfig,
    state: State,
    pending_txs: HashMap<Hash256, SignedTx>,
    known_peers: HashMap<String, PeerNode>,
    is_mining: bool,
    mining_parent: Option<Hash256>,
    cancel_mining: Arc<AtomicBool>,
    mailbox: mpsc::Receiver<NodeMessage>,
    handle: NodeHandle,
}

impl Node {
    /// Carrega o estado do disco e prepara o mailbox
    ///
    /// # Errors
    ///
    /// Falhas de inicialização do ledger são fatais
    pub fn new(config: NodeConfig) -> Result<Self> {
        let state = State::new_from_disk(&config.data_dir)?;

        let mut known_peers = HashMap::new();
        if let Some(bootstrap) = &config.bootstrap {
            known_peers.insert(bootstrap.tcp_address(), bootstrap.clone());
        }

        let (sender, mailbox) = mpsc::channel(64);
        Ok(Self {
            config,
            state,
            pending_txs: HashMap::new(),
            known_peers,
            is_mining: false,
            mining_parent: None,
            cancel_mining: Arc::new(AtomicBool::new(false)),
            mailbox,
            handle: NodeHandle { sender },
        })
    }

    #[must_use]
    pub fn handle(&self) -> NodeHandle {
        self.handle.clone()
    }

    fn self_tcp_address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    /// Sobe a API HTTP e a tarefa de sync e roda o loop de eventos até o
    /// sinal de shutdown. Bloqueante; consome o nó.
    ///
    /// # Errors
    ///
    /// Falha ao abrir a porta HTTP ou falha fatal do ledger
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            datadir = %self.config.data_dir.display(),
            miner = %self.config.miner,
            "🚀 starting node"
        );

        let listener = tokio::net::TcpListener::bind((self.config.ip.as_str(), self.config.port))
            .await
            .map_err(|e| ChainError::Network(e.to_string()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ChainError::Network(e.to_string()))?;
        self.config.port = local_addr.port();
        info!(%local_addr, "📡 HTTP API listening");

        let router = http::router(http::ApiContext {
            node: self.handle(),
            data_dir: self.config.data_dir.clone(),
        });
        let mut http_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown.changed().await;
                })
                .await;
            if let Err(e) = served {
                error!("HTTP server failed: {e}");
            }
        });

        let self_peer = PeerNode::new(
            self.config.ip.clone(),
            self.config.port,
            false,
            self.config.miner,
            true,
        );
        tokio::spawn(sync::run(self.handle(), self_peer, shutdown.clone()));

        let (mined_sender, mut mined_receiver) = mpsc::channel::<Result<Block>>(1);
        let mut mining_interval =
            tokio::time::interval(Duration::from_secs(MINING_INTERVAL_SECONDS));

        loop {
            tokio::select! {
                Some(message) = self.mailbox.recv() => {
                    self.handle_message(message, &mined_sender);
                }
                Some(result) = mined_receiver.recv() => {
                    self.handle_mined(result);
                }
                _ = mining_interval.tick() => {
                    self.maybe_start_mining(&mined_sender);
                }
                _ = shutdown.changed() => break,
            }
        }

        self.cancel_mining.store(true, Ordering::Relaxed);
        info!("👋 node stopped; ledger flushed");
        Ok(())
    }

    fn handle_message(&mut self, message: NodeMessage, mined_sender: &mpsc::Sender<Result<Block>>) {
        match message {
            NodeMessage::PendingTx { tx, reply } => {
                let result = self.add_pending_tx(tx);
                let _ = reply.send(result);
                self.maybe_start_mining(mined_sender);
            }
            NodeMessage::SyncedBlock(block) => self.handle_synced_block(block),
            NodeMessage::PeerDiscovered(peer) => self.add_peer(peer),
            NodeMessage::MarkPeerActive { addr, active } => {
                if let Some(peer) = self.known_peers.get_mut(&addr) {
                    peer.is_active = active;
                }
            }
            NodeMessage::GetBalances { reply } => {
                let _ = reply.send((
                    self.state.latest_block_hash(),
                    self.state.balances_snapshot(),
                ));
            }
            NodeMessage::GetStatus { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    /// Admissão no mempool: autêntica, inédita no mempool e inédita na cadeia
    fn add_pending_tx(&mut self, tx: SignedTx) -> Result<Hash256> {
        if !tx.is_authentic()? {
            return Err(ChainError::UnauthenticTransaction(tx.tx.from.to_string()));
        }
        let hash = tx.hash()?;
        if self.pending_txs.contains_key(&hash) {
            return Err(ChainError::InvalidTransaction(format!(
                "tx {hash} is already pending"
            )));
        }
        if self.state.contains_tx(&hash) {
            return Err(ChainError::InvalidTransaction(format!(
                "tx {hash} is already in the chain"
            )));
        }

        info!(tx = %hash, from = %tx.tx.from, to = %tx.tx.to, value = tx.tx.value, "💸 tx admitted");
        self.pending_txs.insert(hash, tx);
        Ok(hash)
    }

    fn handle_synced_block(&mut self, block: Block) {
        let number = block.header.number;
        match self.state.add_block(block) {
            Ok(hash) => {
                info!(number, hash = %hash, "📥 synced block applied");
                self.evict_mined_txs();
                if self.is_mining && self.mining_parent != Some(self.state.latest_block_hash()) {
                    info!("⛔ preempting in-flight mining: the tip has moved");
                    self.cancel_mining.store(true, Ordering::Relaxed);
                }
            }
            Err(e) => warn!(number, "synced block rejected: {e}"),
        }
    }

    fn handle_mined(&mut self, result: Result<Block>) {
        self.is_mining = false;
        self.mining_parent = None;

        match result {
            Ok(block) => match self.state.add_block(block) {
                Ok(hash) => {
                    info!(hash = %hash, "⛏️ mined block appended");
                    self.evict_mined_txs();
                }
                // Um peer ganhou a corrida; as transações continuam pendentes
                Err(e) => warn!("mined block no longer applies: {e}"),
            },
            Err(ChainError::MiningCancelled) => debug!("mining attempt cancelled"),
            Err(e) => error!("mining failed: {e}"),
        }
    }

    /// Dispara uma tentativa de mineração se não há outra em voo e o mempool
    /// não está vazio. A busca roda fora do executor, em `spawn_blocking`.
    fn maybe_start_mining(&mut self, mined_sender: &mpsc::Sender<Result<Block>>) {
        if self.is_mining || self.pending_txs.is_empty() {
            return;
        }

        // Ordem determinística por tentativa: (time, hash) ascendente
        let mut entries: Vec<(&Hash256, &SignedTx)> = self.pending_txs.iter().collect();
        entries.sort_by_key(|(hash, tx)| (tx.tx.time, **hash));
        let txs: Vec<SignedTx> = entries.into_iter().map(|(_, tx)| tx.clone()).collect();

        let pending = PendingBlock::new(
            self.state.latest_block_hash(),
            self.state.next_block_number(),
            self.config.miner,
            txs,
        );

        self.cancel_mining.store(false, Ordering::Relaxed);
        self.is_mining = true;
        self.mining_parent = Some(pending.parent);
        info!(number = pending.number, txs = pending.txs.len(), "⚒️ starting mining attempt");

        let cancel = Arc::clone(&self.cancel_mining);
        let sender = mined_sender.clone();
        tokio::spawn(async move {
            let result = match tokio::task::spawn_blocking(move || mine(&pending, &cancel)).await {
                Ok(result) => result,
                Err(e) => Err(ChainError::Io(format!("mining task failed: {e}"))),
            };
            let _ = sender.send(result).await;
        });
    }

    fn evict_mined_txs(&mut self) {
        let before = self.pending_txs.len();
        let state = &self.state;
        self.pending_txs.retain(|hash, _| !state.contains_tx(hash));
        let evicted = before - self.pending_txs.len();
        if evicted > 0 {
            debug!(evicted, "evicted mined txs from the mempool");
        }
    }

    fn add_peer(&mut self, peer: PeerNode) {
        let addr = peer.tcp_address();
        if addr == self.self_tcp_address() || self.known_peers.contains_key(&addr) {
            return;
        }
        info!(peer = %addr, "🤝 new peer registered");
        self.known_peers.insert(addr, peer);
    }

    fn status(&self) -> NodeStatus {
        NodeStatus {
            hash: self.state.latest_block_hash(),
            number: self
                .state
                .latest_block()
                .map_or(0, |block| block.header.number),
            known_peers: self.known_peers.clone(),
            pending_txs_count: self.pending_txs.len(),
        }
    }
}
