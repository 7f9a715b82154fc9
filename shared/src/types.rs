//! Tipos e utilitários compartilhados entre os módulos do nó

use std::time::{SystemTime, UNIX_EPOCH};

/// Alias para valor monetário em unidades da cadeia
pub type Amount = u64;

/// Alias para timestamp Unix em segundos
pub type Timestamp = u64;

/// Current Unix time in seconds
#[must_use]
pub fn now_unix() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
