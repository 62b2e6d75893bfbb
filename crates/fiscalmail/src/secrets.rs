//! Secret resolution and at-rest encryption of mailbox credentials.
//!
//! Key material is resolved in priority order:
//!
//! 1. **Direct value** - For quick local testing (`keyInsecure`)
//! 2. **File reference** - For the Docker secrets pattern (`keyFile: /run/secrets/fiscalmail_key`)
//! 3. **Env var reference** - For production (`keyEnvVar: FISCALMAIL_CREDENTIAL_KEY`)
//!
//! Mailbox passwords are sealed with AES-256-GCM and only opened right before
//! a mailbox session is established.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::fs;

use crate::config::CredentialSettings;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("credential key not configured (set keyInsecure, keyFile or keyEnvVar)")]
    NoSourceProvided,

    #[error("cannot read key file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("environment variable '{name}' is not set")]
    EnvVarNotSet { name: String },

    #[error("environment variable '{name}' is not valid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("sealing failed: {0}")]
    EncryptionError(String),

    #[error("cannot open sealed credential: {0}")]
    DecryptionError(String),

    #[error("bad credential key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// One place a key may live.
#[derive(Debug, Clone, Copy)]
enum KeySource<'a> {
    Inline(&'a str),
    File(&'a str),
    Env(&'a str),
}

impl KeySource<'_> {
    fn read(self) -> Result<SecretString> {
        match self {
            KeySource::Inline(value) => Ok(SecretString::from(value.to_string())),
            KeySource::File(path) => {
                let path = expand_home(path);
                fs::read_to_string(&path)
                    .map(|content| SecretString::from(content.trim().to_string()))
                    .map_err(|source| SecretError::FileReadError { path, source })
            }
            KeySource::Env(name) => match std::env::var(name) {
                Ok(value) => Ok(SecretString::from(value.trim().to_string())),
                Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                    name: name.to_string(),
                }),
                Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                    name: name.to_string(),
                }),
            },
        }
    }
}

/// Resolves a secret from a direct value, a file, or an environment variable.
///
/// The first non-empty source wins; it is not an error for a later source to
/// be missing once an earlier one is set.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    let chosen = [
        direct.map(KeySource::Inline),
        file_path.map(KeySource::File),
        env_var.map(KeySource::Env),
    ]
    .into_iter()
    .flatten()
    .find(|source| match source {
        KeySource::Inline(v) | KeySource::File(v) | KeySource::Env(v) => !v.is_empty(),
    });

    chosen.ok_or(SecretError::NoSourceProvided)?.read()
}

fn expand_home(path: &str) -> String {
    let Some(rest) = path.strip_prefix('~') else {
        return path.to_string();
    };
    if !(rest.is_empty() || rest.starts_with('/')) {
        return path.to_string();
    }
    match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        Some(home) => format!("{}{}", home.to_string_lossy(), rest),
        None => path.to_string(),
    }
}

/// Default environment variable holding the credential key.
pub const CREDENTIAL_KEY_ENV_VAR: &str = "FISCALMAIL_CREDENTIAL_KEY";

const ENVELOPE_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;

/// Seals mailbox passwords for storage.
///
/// Sealed values are base64 of `version || nonce || ciphertext`. The source id
/// is bound as associated data, so a password copied onto another source
/// fails to open.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Builds a cipher from the key sources named in the settings.
    pub fn from_settings(settings: &CredentialSettings) -> Result<Self> {
        let key = resolve_secret(
            settings.key_insecure.as_deref(),
            settings.key_file.as_deref(),
            settings.key_env_var.as_deref(),
        )?;
        Self::from_hex_key(key.expose_secret())
    }

    /// Creates a cipher from a 32-byte key written as 64 hex characters.
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key = parse_hex_key(key_hex.trim())?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    pub fn seal(&self, source_id: &str, password: &SecretString) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce)
            .map_err(|e| SecretError::EncryptionError(format!("no randomness available: {}", e)))?;

        let payload = Payload {
            msg: password.expose_secret().as_bytes(),
            aad: source_id.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), payload)
            .map_err(|e| SecretError::EncryptionError(e.to_string()))?;

        let mut envelope = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        envelope.push(ENVELOPE_VERSION);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(envelope))
    }

    pub fn open(&self, source_id: &str, sealed: &str) -> Result<SecretString> {
        let envelope = STANDARD
            .decode(sealed.trim())
            .map_err(|e| SecretError::DecryptionError(format!("not base64: {}", e)))?;

        let (version, rest) = envelope
            .split_first()
            .ok_or_else(|| SecretError::DecryptionError("empty value".to_string()))?;
        if *version != ENVELOPE_VERSION {
            return Err(SecretError::DecryptionError(format!(
                "unsupported envelope version {}",
                version
            )));
        }
        if rest.len() <= NONCE_LEN {
            return Err(SecretError::DecryptionError("value too short".to_string()));
        }

        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let payload = Payload {
            msg: ciphertext,
            aad: source_id.as_bytes(),
        };
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| SecretError::DecryptionError("authentication failed".to_string()))?;

        String::from_utf8(plaintext)
            .map(SecretString::from)
            .map_err(|_| SecretError::DecryptionError("password is not UTF-8".to_string()))
    }
}

fn parse_hex_key(key_hex: &str) -> Result<[u8; 32]> {
    if key_hex.len() != 64 || !key_hex.is_ascii() {
        return Err(SecretError::InvalidKey(format!(
            "expected 64 hex characters, got {}",
            key_hex.len()
        )));
    }

    let mut key = [0u8; 32];
    for (i, byte) in key.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&key_hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| SecretError::InvalidKey(format!("invalid hex at position {}", i * 2)))?;
    }
    Ok(key)
}
