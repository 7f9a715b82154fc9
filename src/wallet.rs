//! Keystore de contas: chaves secp256k1 cifradas com AES-256-GCM sob uma
//! chave derivada da senha com Argon2id.
//!
//! Cada conta vive em `<datadir>/keystore/<endereço hex>.json`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::Argon2;
use chain_core::{SignedTx, Tx};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use shared::{Account, ChainError, KeyPair, Result, SecretKey};
use std::fs;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

const KEYSTORE_CIPHER: &str = "aes-256-gcm";
const KEYSTORE_KDF: &str = "argon2id";

/// Conteúdo de um arquivo de keystore
#[derive(Debug, Serialize, Deserialize)]
struct KeystoreFile {
    address: String,
    crypto: KeystoreCrypto,
}

#[derive(Debug, Serialize, Deserialize)]
struct KeystoreCrypto {
    cipher: String,
    ciphertext: String,
    nonce: String,
    kdf: String,
    salt: String,
}

#[must_use]
pub fn keystore_dir_path(data_dir: &Path) -> PathBuf {
    data_dir.join("keystore")
}

fn account_file_path(data_dir: &Path, account: Account) -> PathBuf {
    keystore_dir_path(data_dir).join(format!("{}.json", hex::encode(account.as_bytes())))
}

/// Gera um novo par de chaves e grava o keystore cifrado
///
/// # Errors
///
/// Retorna erro em falhas de I/O ou de cifragem
pub fn new_account(data_dir: &Path, passphrase: &str) -> Result<Account> {
    let keypair = KeyPair::generate();

    fs::create_dir_all(keystore_dir_path(data_dir)).map_err(|e| ChainError::Io(e.to_string()))?;

    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; 12];
    OsRng.fill_bytes(&mut nonce);

    let mut key = derive_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), keypair.secret.secret_bytes().as_ref())
        .map_err(|_| ChainError::Keystore("encryption failed".to_string()))?;
    key.zeroize();

    let keystore = KeystoreFile {
        address: keypair.account.to_string(),
        crypto: KeystoreCrypto {
            cipher: KEYSTORE_CIPHER.to_string(),
            ciphertext: hex::encode(ciphertext),
            nonce: hex::encode(nonce),
            kdf: KEYSTORE_KDF.to_string(),
            salt: hex::encode(salt),
        },
    };
    let content = serde_json::to_vec_pretty(&keystore)
        .map_err(|e| ChainError::Serialization(e.to_string()))?;
    fs::write(account_file_path(data_dir, keypair.account), content)
        .map_err(|e| ChainError::Io(e.to_string()))?;

    Ok(keypair.account)
}

/// Decifra a chave secreta de uma conta do keystore
///
/// # Errors
///
/// `NotFound` se a conta não tem arquivo; `Keystore` para senha errada ou
/// arquivo corrompido
pub fn load_key(data_dir: &Path, account: Account, passphrase: &str) -> Result<SecretKey> {
    let path = account_file_path(data_dir, account);
    let content = fs::read(&path)
        .map_err(|_| ChainError::NotFound(format!("no keystore file for account {account}")))?;
    let keystore: KeystoreFile =
        serde_json::from_slice(&content).map_err(|e| ChainError::Serialization(e.to_string()))?;

    if keystore.crypto.cipher != KEYSTORE_CIPHER || keystore.crypto.kdf != KEYSTORE_KDF {
        return Err(ChainError::Keystore(format!(
            "unsupported keystore scheme {}/{}",
            keystore.crypto.cipher, keystore.crypto.kdf
        )));
    }

    let salt = decode_hex_field(&keystore.crypto.salt, "salt")?;
    let nonce = decode_hex_field(&keystore.crypto.nonce, "nonce")?;
    let ciphertext = decode_hex_field(&keystore.crypto.ciphertext, "ciphertext")?;

    let mut key = derive_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| ChainError::Keystore("wrong passphrase or corrupted keystore".to_string()))?;
    key.zeroize();

    let secret = SecretKey::from_slice(&plaintext)
        .map_err(|_| ChainError::Keystore("invalid key material".to_string()));
    plaintext.zeroize();
    secret
}

/// Assina uma transação com a chave de uma conta do keystore
///
/// # Errors
///
/// Propaga os erros de `load_key` e da assinatura
pub fn sign_tx_with_keystore_account(
    data_dir: &Path,
    account: Account,
    passphrase: &str,
    tx: Tx,
) -> Result<SignedTx> {
    let secret = load_key(data_dir, account, passphrase)?;
    SignedTx::sign(tx, &secret)
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| ChainError::Keystore(e.to_string()))?;
    Ok(key)
}

fn decode_hex_field(value: &str, field: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|_| ChainError::Keystore(format!("malformed {field} field")))
}
