//! Leaf lookups loaded from configuration: the transaction table (PCT) and
//! the destination control table (DCT). Both are immutable once built.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{CicsError, CicsResult};

/// Maximum INDIRECT hops followed when resolving a destination.
pub const MAX_INDIRECT_DEPTH: usize = 3;

/// Transaction code to program name.
#[derive(Debug, Clone, Default)]
pub struct TransactionRegistry {
    programs: HashMap<String, String>,
}

impl TransactionRegistry {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self {
            programs: entries
                .into_iter()
                .map(|(code, program)| {
                    (
                        code.as_ref().trim().to_uppercase(),
                        program.as_ref().trim().to_uppercase(),
                    )
                })
                .collect(),
        }
    }

    /// Program name for a transaction code.
    pub fn resolve(&self, transid: &str) -> CicsResult<&str> {
        self.programs
            .get(&transid.trim().to_uppercase())
            .map(String::as_str)
            .ok_or_else(|| CicsError::TransactionNotFound {
                transid: transid.trim().to_string(),
            })
    }

    pub fn contains(&self, transid: &str) -> bool {
        self.programs.contains_key(&transid.trim().to_uppercase())
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

/// Destination type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DestinationKind {
    /// Intrapartition queue
    #[default]
    Intra,
    /// Extrapartition (sequential) destination
    Extra,
    /// Alias of another destination
    Indirect,
}

/// One DCT entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationEntry {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: DestinationKind,
    /// Destination an INDIRECT entry points to
    #[serde(default)]
    pub indirect_target: Option<String>,
    /// Transaction started when the trigger level is reached
    #[serde(default)]
    pub transaction: Option<String>,
    /// Queue depth that starts `transaction` (0 = never)
    #[serde(default)]
    pub trigger_level: usize,
}

impl DestinationEntry {
    /// Intrapartition destination.
    pub fn intra(id: &str) -> Self {
        Self {
            id: id.to_uppercase(),
            kind: DestinationKind::Intra,
            indirect_target: None,
            transaction: None,
            trigger_level: 0,
        }
    }

    /// Extrapartition destination.
    pub fn extra(id: &str) -> Self {
        Self {
            kind: DestinationKind::Extra,
            ..Self::intra(id)
        }
    }

    /// Indirect destination.
    pub fn indirect(id: &str, target: &str) -> Self {
        Self {
            kind: DestinationKind::Indirect,
            indirect_target: Some(target.to_uppercase()),
            ..Self::intra(id)
        }
    }

    /// Start `transaction` once the queue holds `level` records.
    pub fn with_trigger(mut self, transaction: &str, level: usize) -> Self {
        self.transaction = Some(transaction.to_uppercase());
        self.trigger_level = level;
        self
    }
}

/// Destination id to DCT entry.
#[derive(Debug, Clone, Default)]
pub struct DestinationRegistry {
    entries: HashMap<String, DestinationEntry>,
}

impl DestinationRegistry {
    pub fn new(entries: impl IntoIterator<Item = DestinationEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.id.trim().to_uppercase(), entry))
                .collect(),
        }
    }

    /// Resolve a destination id, following INDIRECT entries.
    pub fn resolve(&self, dest: &str) -> CicsResult<&DestinationEntry> {
        let mut entry = self.lookup(dest)?;
        let mut hops = 0;
        while entry.kind == DestinationKind::Indirect {
            if hops == MAX_INDIRECT_DEPTH {
                return Err(CicsError::IndirectTooDeep {
                    dest: dest.trim().to_uppercase(),
                    depth: MAX_INDIRECT_DEPTH,
                });
            }
            let target = entry.indirect_target.as_deref().ok_or_else(|| {
                CicsError::Config(format!("indirect destination '{}' has no target", entry.id))
            })?;
            entry = self.lookup(target)?;
            hops += 1;
        }
        Ok(entry)
    }

    fn lookup(&self, dest: &str) -> CicsResult<&DestinationEntry> {
        self.entries
            .get(&dest.trim().to_uppercase())
            .ok_or_else(|| CicsError::DestinationNotFound {
                dest: dest.trim().to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
