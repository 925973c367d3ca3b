//! Identifier to key/document mapping.
//!
//! Keys are the identifier rendered as a 20-digit, zero-padded decimal string,
//! so lexicographic order of keys (and of the emails derived from them) matches
//! numeric order of identifiers. Range-partitioned indexes rely on that.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::BenchConfig;
use crate::error::{BenchError, Result};

/// Width of every document key.
pub const KEY_WIDTH: usize = 20;

/// Numeric identifier of a synthetic document.
pub type DocumentId = u128;

/// Number of identifiers that fit in [`KEY_WIDTH`] digits: keys exist for `[0, KEY_SPACE)`.
pub const KEY_SPACE: DocumentId = DocumentId::pow(10, KEY_WIDTH as u32);

const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Fixed-width primary key of a synthetic document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey(String);

impl DocumentKey {
    /// Render `id` as a key. Identifiers needing more than [`KEY_WIDTH`]
    /// digits would break key ordering and are rejected.
    pub fn new(id: DocumentId) -> Result<Self> {
        if id >= KEY_SPACE {
            return Err(BenchError::Validation(format!(
                "identifier {id} does not fit in {KEY_WIDTH} digits"
            )));
        }
        Ok(Self(format!("{id:0width$}", width = KEY_WIDTH)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the identifier back out of a key.
    pub fn id(&self) -> Option<DocumentId> {
        self.0.parse().ok()
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Body stored under a [`DocumentKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub email: String,
    pub name: String,
}

/// Builds keys, emails and documents for a configured domain.
#[derive(Debug, Clone)]
pub struct Codec {
    domain: String,
    name_length: usize,
}

impl Codec {
    pub fn new(domain: impl Into<String>, name_length: usize) -> Self {
        Self {
            domain: domain.into(),
            name_length,
        }
    }

    pub fn from_config(config: &BenchConfig) -> Self {
        Self::new(config.email_domain.clone(), config.name_length)
    }

    pub fn key(&self, id: DocumentId) -> Result<DocumentKey> {
        DocumentKey::new(id)
    }

    pub fn email_for_key(&self, key: &DocumentKey) -> String {
        format!("{}@{}", key, self.domain)
    }

    pub fn email(&self, id: DocumentId) -> Result<String> {
        Ok(self.email_for_key(&self.key(id)?))
    }

    /// Build the document for `id`. The name is freshly sampled on every call.
    pub fn record<R: Rng>(
        &self,
        id: DocumentId,
        rng: &mut R,
    ) -> Result<(DocumentKey, DocumentRecord)> {
        let key = self.key(id)?;
        let record = DocumentRecord {
            email: self.email_for_key(&key),
            name: self.random_name(rng),
        };
        Ok((key, record))
    }

    pub fn random_name<R: Rng>(&self, rng: &mut R) -> String {
        (0..self.name_length)
            .map(|_| NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char)
            .collect()
    }

    /// Draw a uniform identifier in `[0, max_docs)` and return it with its email.
    ///
    /// `max_docs` must be non-zero.
    pub fn random_email<R: Rng>(
        &self,
        rng: &mut R,
        max_docs: DocumentId,
    ) -> Result<(DocumentId, String)> {
        let id = rng.gen_range(0..max_docs);
        Ok((id, self.email(id)?))
    }
}
