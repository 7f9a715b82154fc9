//! Sincronização periódica com peers conhecidos.
//!
//! A cada ciclo o nó consulta `/node/status` de cada peer, importa peers
//! anunciados que ainda não conhece, anuncia a si mesmo quando o peer não o
//! conhece e puxa blocos com `/node/sync` quando a cadeia do peer está à
//! frente. Falhas são isoladas por peer: o peer fica inativo e é tentado de
//! novo no próximo ciclo.

use shared::{ChainError, Result};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::node::{
    NodeHandle, NodeStatus, PeerNode, SyncResponse, PEER_REQUEST_TIMEOUT_SECONDS,
    SYNC_INTERVAL_SECONDS,
};

pub async fn run(handle: NodeHandle, self_peer: PeerNode, mut shutdown: watch::Receiver<bool>) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(PEER_REQUEST_TIMEOUT_SECONDS))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!("failed to build the sync HTTP client: {e}");
            return;
        }
    };

    let mut interval = tokio::time::interval(Duration::from_secs(SYNC_INTERVAL_SECONDS));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = sync_once(&client, &handle, &self_peer).await {
                    warn!("sync pass aborted: {e}");
                }
            }
            _ = shutdown.changed() => {
                debug!("sync task stopping");
                break;
            }
        }
    }
}

async fn sync_once(
    client: &reqwest::Client,
    handle: &NodeHandle,
    self_peer: &PeerNode,
) -> Result<()> {
    let local = handle.status().await?;

    for (addr, peer) in &local.known_peers {
        if *addr == self_peer.tcp_address() {
            continue;
        }
        if let Err(e) = sync_with_peer(client, handle, self_peer, &local, peer).await {
            warn!(peer = %addr, "peer sync failed: {e}");
            handle.mark_peer_active(addr.clone(), false).await?;
        }
    }

    Ok(())
}

async fn sync_with_peer(
    client: &reqwest::Client,
    handle: &NodeHandle,
    self_peer: &PeerNode,
    local: &NodeStatus,
    peer: &PeerNode,
) -> Result<()> {
    let peer_status: NodeStatus = fetch_json(
        client,
        &format!("{}/node/status", peer.base_url()),
    )
    .await?;
    handle.mark_peer_active(peer.tcp_address(), true).await?;

    // Descoberta: peers anunciados entram inativos até o primeiro ciclo deles
    for (addr, advertised) in &peer_status.known_peers {
        if *addr != self_peer.tcp_address() {
            let mut advertised = advertised.clone();
            advertised.is_active = false;
            handle.add_peer(advertised).await?;
        }
    }

    // Se o peer não nos conhece, pede para entrar no registro dele
    if !peer_status
        .known_peers
        .contains_key(&self_peer.tcp_address())
    {
        let join_url = format!(
            "{}/node/peer?ip={}&port={}&account={}",
            peer.base_url(),
            self_peer.ip,
            self_peer.port,
            self_peer.account
        );
        match client.get(&join_url).send().await {
            Ok(_) => debug!(peer = %peer.tcp_address(), "announced ourselves"),
            Err(e) => warn!(peer = %peer.tcp_address(), "join announce failed: {e}"),
        }
    }

    // Cadeia mais longa vence: só puxa quando o peer está à frente
    let peer_is_ahead = if peer_status.hash.is_zero() {
        false
    } else if local.hash.is_zero() {
        true
    } else {
        peer_status.number > local.number
    };
    if !peer_is_ahead {
        return Ok(());
    }

    let sync_url = format!(
        "{}/node/sync?fromBlock={}",
        peer.base_url(),
        local.hash
    );
    let response: SyncResponse = fetch_json(client, &sync_url).await?;
    if !response.blocks.is_empty() {
        info!(
            peer = %peer.tcp_address(),
            blocks = response.blocks.len(),
            "📦 importing blocks from peer"
        );
    }
    for block in response.blocks {
        handle.deliver_block(block).await?;
    }

    Ok(())
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T> {
    client
        .get(url)
        .send()
        .await
        .map_err(|e| ChainError::Network(e.to_string()))?
        .error_for_status()
        .map_err(|e| ChainError::Network(e.to_string()))?
        .json()
        .await
        .map_err(|e| ChainError::Network(e.to_string()))
}
