use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{Account, Amount, ChainError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Gênese embutida no binário, espelhada para o disco na primeira execução
pub const GENESIS_JSON: &str = r#"{
  "genesis_time": "2024-03-18T00:00:00.000000000Z",
  "chain_id": "minichain-ledger",
  "balances": {
    "0x22ba1F80452E6220c7cc6ea2D1e3EEDDaC5F694A": 1000000
  }
}"#;

/// Alocação inicial de saldos da cadeia
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    pub genesis_time: DateTime<Utc>,
    pub chain_id: String,
    pub balances: HashMap<Account, Amount>,
}

/// Lê e decodifica `genesis.json`
///
/// # Errors
///
/// Retorna erro se o arquivo não puder ser lido ou decodificado
pub fn load_genesis(path: &Path) -> Result<Genesis> {
    let content = fs::read(path).map_err(|e| ChainError::Io(e.to_string()))?;
    serde_json::from_slice(&content).map_err(|e| ChainError::Serialization(e.to_string()))
}

#[must_use]
pub fn genesis_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("genesis.json")
}

#[must_use]
pub fn block_db_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("block.db")
}

/// Prepara o diretório de dados: cria o diretório, grava `genesis.json` se
/// ausente e cria um `block.db` vazio se ausente. Idempotente.
///
/// # Errors
///
/// Retorna erro em falhas de I/O
pub fn init_data_dir_if_not_exists(data_dir: &Path, genesis: &[u8]) -> Result<()> {
    fs::create_dir_all(data_dir).map_err(|e| ChainError::Io(e.to_string()))?;

    let genesis_path = genesis_file_path(data_dir);
    if !genesis_path.exists() {
        fs::write(&genesis_path, genesis).map_err(|e| ChainError::Io(e.to_string()))?;
    }

    let db_path = block_db_file_path(data_dir);
    if !db_path.exists() {
        fs::write(&db_path, b"").map_err(|e| ChainError::Io(e.to_string()))?;
    }

    Ok(())
}
