use thiserror::Error;

/// Erros do nó e da cadeia
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Transação inválida: {0}")]
    InvalidTransaction(String),

    #[error("Bloco inválido: {0}")]
    InvalidBlock(String),

    #[error("Hash inválido: {0}")]
    InvalidHash(String),

    #[error("Endereço inválido: {0}")]
    InvalidAddress(String),

    #[error("Assinatura inválida")]
    InvalidSignature,

    #[error("Transação não autêntica: remetente declarado {0}")]
    UnauthenticTransaction(String),

    #[error("Fundos insuficientes: conta {account} tem {balance}, transferência de {value}")]
    InsufficientFunds {
        account: String,
        balance: u64,
        value: u64,
    },

    #[error("Overflow de saldo na conta {0}")]
    BalanceOverflow(String),

    #[error("Mineração cancelada")]
    MiningCancelled,

    #[error("Erro de serialização: {0}")]
    Serialization(String),

    #[error("Erro de I/O: {0}")]
    Io(String),

    #[error("Erro de rede: {0}")]
    Network(String),

    #[error("Erro de configuração: {0}")]
    Config(String),

    #[error("Erro de keystore: {0}")]
    Keystore(String),

    #[error("Não encontrado: {0}")]
    NotFound(String),
}
