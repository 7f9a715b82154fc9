//! API HTTP do nó.
//!
//! Os handlers não tocam o estado: consultas e submissões passam pelo
//! mailbox do coordenador; só `/node/sync` lê o log de blocos direto do
//! disco. Campos de topo das respostas usam hex com prefixo 0x; blocos e
//! transações viajam na forma canônica.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chain_core::{blocks_after, SignedTx, Tx};
use serde::{Deserialize, Serialize};
use shared::{Account, ChainError, Hash256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::node::{NodeHandle, NodeStatus, PeerNode, SyncResponse};
use crate::wallet;

/// Estado compartilhado dos handlers
#[derive(Clone)]
pub struct ApiContext {
    pub node: NodeHandle,
    pub data_dir: PathBuf,
}

pub fn router(context: ApiContext) -> Router {
    Router::new()
        .route("/balances/list", get(balances_list))
        .route("/tx/add", post(tx_add))
        .route("/node/status", get(node_status))
        .route("/node/sync", get(node_sync))
        .route("/node/peer", get(node_peer))
        .with_state(context)
}

/// Erro de API: `{error}` com o status adequado ao tipo de falha
pub struct ApiError(ChainError);

impl From<ChainError> for ApiError {
    fn from(error: ChainError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChainError::InvalidTransaction(_)
            | ChainError::InvalidBlock(_)
            | ChainError::InvalidHash(_)
            | ChainError::InvalidAddress(_)
            | ChainError::InvalidSignature
            | ChainError::UnauthenticTransaction(_)
            | ChainError::InsufficientFunds { .. }
            | ChainError::Keystore(_) => StatusCode::BAD_REQUEST,
            ChainError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct BalancesResponse {
    hash: String,
    balances: BTreeMap<String, u64>,
}

/// Corpo aceito em `/tx/add`: uma transação já assinada ou a forma legada
/// não assinada, que o nó assina com a chave do keystore do remetente
#[derive(Deserialize)]
#[serde(untagged)]
enum TxAddRequest {
    Signed(SignedTx),
    Unsigned(UnsignedTxRequest),
}

#[derive(Deserialize)]
struct UnsignedTxRequest {
    from: Account,
    to: Account,
    value: u64,
    #[serde(default)]
    data: String,
    #[serde(default)]
    from_pwd: String,
}

#[derive(Serialize)]
struct TxAddResponse {
    hash: String,
}

#[derive(Deserialize)]
struct SyncQuery {
    #[serde(rename = "fromBlock")]
    from_block: String,
}

#[derive(Deserialize)]
struct PeerQuery {
    ip: String,
    port: u16,
    #[serde(default)]
    account: Option<Account>,
}

#[derive(Serialize)]
struct PeerJoinResponse {
    success: bool,
}

async fn balances_list(
    State(context): State<ApiContext>,
) -> Result<Json<BalancesResponse>, ApiError> {
    let (hash, balances) = context.node.balances().await?;
    let balances = balances
        .into_iter()
        .map(|(account, balance)| (account.to_string(), balance))
        .collect();
    Ok(Json(BalancesResponse {
        hash: hash.to_string(),
        balances,
    }))
}

async fn tx_add(
    State(context): State<ApiContext>,
    Json(request): Json<TxAddRequest>,
) -> Result<Json<TxAddResponse>, ApiError> {
    let signed = match request {
        TxAddRequest::Signed(signed) => signed,
        TxAddRequest::Unsigned(unsigned) => {
            let tx = Tx::new(unsigned.from, unsigned.to, unsigned.value, unsigned.data);
            let data_dir = context.data_dir.clone();
            // A derivação de chave do keystore é cara; fora do executor
            tokio::task::spawn_blocking(move || {
                wallet::sign_tx_with_keystore_account(
                    &data_dir,
                    unsigned.from,
                    &unsigned.from_pwd,
                    tx,
                )
            })
            .await
            .map_err(|e| ChainError::Keystore(format!("signing task failed: {e}")))??
        }
    };

    let hash = context.node.submit_tx(signed).await?;
    Ok(Json(TxAddResponse {
        hash: hash.to_string(),
    }))
}

async fn node_status(State(context): State<ApiContext>) -> Result<Json<NodeStatus>, ApiError> {
    Ok(Json(context.node.status().await?))
}

async fn node_sync(
    State(context): State<ApiContext>,
    Query(query): Query<SyncQuery>,
) -> Result<Json<SyncResponse>, ApiError> {
    let from = Hash256::from_str(&query.from_block)?;
    let data_dir = context.data_dir.clone();
    let blocks = tokio::task::spawn_blocking(move || blocks_after(&data_dir, from))
        .await
        .map_err(|e| ChainError::Io(format!("sync read task failed: {e}")))??;
    Ok(Json(SyncResponse { blocks }))
}

async fn node_peer(
    State(context): State<ApiContext>,
    Query(query): Query<PeerQuery>,
) -> Result<Json<PeerJoinResponse>, ApiError> {
    let peer = PeerNode::new(
        query.ip,
        query.port,
        false,
        query.account.unwrap_or_default(),
        true,
    );
    context.node.add_peer(peer).await?;
    Ok(Json(PeerJoinResponse { success: true }))
}
