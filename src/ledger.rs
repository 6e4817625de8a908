//! Manually tracked loan and locked-token records.
//!
//! A ledger is a JSON array of free-form objects stored as one document.
//! Entries are identified by a generated `id` and carry `createdAt` and,
//! once edited, `updatedAt` timestamps.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::clock::{Clock, SystemClock};
use crate::documents::{DocumentError, DocumentStore};

pub type LedgerEntry = Map<String, Value>;

/// Attempts made when a concurrent writer keeps moving the document.
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
    Loans,
    LockedTokens,
}

impl LedgerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerKind::Loans => "loans",
            LedgerKind::LockedTokens => "locked-tokens",
        }
    }

    /// Document key the ledger is stored under.
    pub fn document_key(&self) -> &'static str {
        match self {
            LedgerKind::Loans => "data/loans.json",
            LedgerKind::LockedTokens => "data/locked-tokens.json",
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LedgerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "loans" => Ok(LedgerKind::Loans),
            "locked-tokens" => Ok(LedgerKind::LockedTokens),
            other => anyhow::bail!("Unknown ledger: {other}"),
        }
    }
}

pub struct Ledger {
    store: Arc<dyn DocumentStore>,
    kind: LedgerKind,
    clock: Arc<dyn Clock>,
}

fn entry_id(entry: &LedgerEntry) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

impl Ledger {
    pub fn new(store: Arc<dyn DocumentStore>, kind: LedgerKind) -> Self {
        Self {
            store,
            kind,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn kind(&self) -> LedgerKind {
        self.kind
    }

    fn now(&self) -> Value {
        Value::String(self.clock.now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
    }

    async fn load(&self) -> Result<(Vec<LedgerEntry>, Option<String>)> {
        let key = self.kind.document_key();
        let Some(document) = self.store.read(key).await? else {
            return Ok((Vec::new(), None));
        };
        let entries: Vec<LedgerEntry> = serde_json::from_value(document.content)
            .with_context(|| format!("{key} is not an array of objects"))?;
        Ok((entries, Some(document.version)))
    }

    /// All entries in stored order.
    pub async fn list(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self.load().await?.0)
    }

    /// Read, apply `edit`, and write back, retrying if the document moved.
    ///
    /// `edit` returns `None` to leave the document untouched.
    async fn mutate<T, F>(&self, action: &str, mut edit: F) -> Result<Option<T>>
    where
        F: FnMut(&mut Vec<LedgerEntry>) -> Option<T>,
    {
        let key = self.kind.document_key();
        let message = format!(
            "Update {} {} ({action})",
            self.kind,
            self.clock.now().format("%Y-%m-%d")
        );
        let mut attempt = 1;
        loop {
            let (mut entries, version) = self.load().await?;
            let Some(outcome) = edit(&mut entries) else {
                return Ok(None);
            };
            let content = Value::Array(entries.into_iter().map(Value::Object).collect());
            match self
                .store
                .write(key, &content, version.as_deref(), &message)
                .await
            {
                Ok(_) => return Ok(Some(outcome)),
                Err(DocumentError::Conflict { .. }) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(ledger = %self.kind, attempt, "Ledger changed underneath; retrying");
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to save {}", self.kind));
                }
            }
        }
    }

    /// Append an entry, assigning `id` and `createdAt`.
    pub async fn add(&self, fields: LedgerEntry) -> Result<LedgerEntry> {
        let mut entry = fields;
        entry.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        entry.insert("createdAt".into(), self.now());

        let added = self
            .mutate("add", |entries| {
                entries.push(entry.clone());
                Some(entry.clone())
            })
            .await?;
        added.context("Ledger add produced no entry")
    }

    /// Shallow-merge `patch` into the entry with `id` and stamp `updatedAt`.
    ///
    /// Returns `None`, without writing, if no entry has that id.
    pub async fn update(&self, id: &str, patch: LedgerEntry) -> Result<Option<LedgerEntry>> {
        let updated_at = self.now();
        self.mutate("update", |entries| {
            let entry = entries.iter_mut().find(|e| entry_id(e) == Some(id))?;
            for (field, value) in &patch {
                if field != "id" && field != "createdAt" {
                    entry.insert(field.clone(), value.clone());
                }
            }
            entry.insert("updatedAt".into(), updated_at.clone());
            Some(entry.clone())
        })
        .await
    }

    /// Remove the entry with `id`. Returns whether one was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = self
            .mutate("delete", |entries| {
                let index = entries.iter().position(|e| entry_id(e) == Some(id))?;
                Some(entries.remove(index))
            })
            .await?;
        Ok(removed.is_some())
    }
}
