//! Assinaturas ECDSA recuperáveis sobre secp256k1.
//!
//! A assinatura tem 65 bytes: 64 bytes compactos (r || s) seguidos do id de
//! recuperação. A conta do signatário é derivada da chave pública recuperada,
//! então verificar autenticidade é recuperar e comparar com o campo `from`.

use once_cell::sync::Lazy;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{All, Message, Secp256k1};

pub use secp256k1::{PublicKey, SecretKey};

use crate::{Account, ChainError, Hash256, Result};

/// Tamanho de uma assinatura recuperável em bytes
pub const SIGNATURE_LENGTH: usize = 65;

static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// Par de chaves secp256k1 com o endereço derivado
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
    pub account: Account,
}

impl KeyPair {
    /// Gera um novo par de chaves aleatório
    #[must_use]
    pub fn generate() -> Self {
        let (secret, public) = SECP.generate_keypair(&mut rand::thread_rng());
        Self::from_parts(secret, public)
    }

    /// Reconstrói o par de chaves a partir da chave secreta
    #[must_use]
    pub fn from_secret(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(&SECP, &secret);
        Self::from_parts(secret, public)
    }

    fn from_parts(secret: SecretKey, public: PublicKey) -> Self {
        let account = Account::from_public_key(&public.serialize_uncompressed());
        Self {
            secret,
            public,
            account,
        }
    }
}

/// Assina um digest de 32 bytes, produzindo a assinatura recuperável
#[must_use]
pub fn sign_digest(digest: &Hash256, secret: &SecretKey) -> [u8; SIGNATURE_LENGTH] {
    let message = Message::from_digest(*digest.as_bytes());
    let signature = SECP.sign_ecdsa_recoverable(&message, secret);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&compact);
    out[64] = recovery_id.to_i32() as u8;
    out
}

/// Recupera a conta do signatário a partir do digest e da assinatura
///
/// # Errors
///
/// Retorna `InvalidSignature` se o tamanho não for 65 bytes ou se a
/// recuperação da chave pública falhar
pub fn recover_account(digest: &Hash256, signature: &[u8]) -> Result<Account> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(ChainError::InvalidSignature);
    }

    let recovery_id = RecoveryId::from_i32(i32::from(signature[64]))
        .map_err(|_| ChainError::InvalidSignature)?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|_| ChainError::InvalidSignature)?;

    let message = Message::from_digest(*digest.as_bytes());
    let public = SECP
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| ChainError::InvalidSignature)?;

    Ok(Account::from_public_key(&public.serialize_uncompressed()))
}
