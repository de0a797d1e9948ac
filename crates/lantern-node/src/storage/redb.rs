//! Redb-backed durable store.
//!
//! Uses redb's ACID transactions so all collections survive process
//! restarts. Each collection is a pair of tables: a sequence-keyed log table
//! (preserving first-arrival order) and an id → sequence index giving
//! last-writer-wins overwrite in place. Sightings get their own log table
//! feeding the dedupe rebuild at startup.

use std::{path::Path, sync::Arc};

use lantern_core::DEDUPE_CAPACITY;
use lantern_proto::{DecryptedMessage, EnvelopeKind, KeyEnvelope, MessageEnvelope, MsgId};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition, WriteTransaction};
use serde::{de::DeserializeOwned, Serialize};

use super::{MeshStore, StoreError};
use crate::identity::NodeIdentity;

/// Log tables: sequence → JSON record.
const MESSAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("messages");
const KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("keys");
const DECRYPTED: TableDefinition<u64, &[u8]> = TableDefinition::new("decrypted");

/// Index tables: msg id (16 bytes BE) → sequence in the log table.
const MESSAGE_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("message_index");
const KEY_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("key_index");
const DECRYPTED_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("decrypted_index");

/// Sightings: sequence → kind byte + msg id (16 bytes BE).
const SIGHTINGS: TableDefinition<u64, &[u8]> = TableDefinition::new("sightings");

/// Identity: single fixed key → JSON record.
const IDENTITY: TableDefinition<&str, &[u8]> = TableDefinition::new("identity");

const IDENTITY_KEY: &str = "identity";

const KIND_MESSAGE: u8 = 0;
const KIND_KEY: u8 = 1;

/// Durable [`MeshStore`] backed by redb. Clone is cheap (`Arc`).
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a database at the given path, creating all tables.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        let txn = db.begin_write().map_err(io_err)?;
        {
            txn.open_table(MESSAGES).map_err(io_err)?;
            txn.open_table(KEYS).map_err(io_err)?;
            txn.open_table(DECRYPTED).map_err(io_err)?;
            txn.open_table(MESSAGE_INDEX).map_err(io_err)?;
            txn.open_table(KEY_INDEX).map_err(io_err)?;
            txn.open_table(DECRYPTED_INDEX).map_err(io_err)?;
            txn.open_table(SIGHTINGS).map_err(io_err)?;
            txn.open_table(IDENTITY).map_err(io_err)?;
        }
        txn.commit().map_err(io_err)?;

        Ok(Self { db: Arc::new(db) })
    }

    fn save_record<T: Serialize>(
        &self,
        log: TableDefinition<u64, &[u8]>,
        index: TableDefinition<&[u8], u64>,
        msg_id: MsgId,
        record: &T,
        sighting: Option<EnvelopeKind>,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(ser_err)?;
        let id_key = msg_id.to_bits().to_be_bytes();

        let txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut log_table = txn.open_table(log).map_err(io_err)?;
            let mut index_table = txn.open_table(index).map_err(io_err)?;

            let existing = index_table
                .get(id_key.as_slice())
                .map_err(io_err)?
                .map(|guard| guard.value());

            match existing {
                Some(seq) => {
                    log_table.insert(seq, bytes.as_slice()).map_err(io_err)?;
                },
                None => {
                    let seq = next_seq(&log_table)?;
                    log_table.insert(seq, bytes.as_slice()).map_err(io_err)?;
                    index_table.insert(id_key.as_slice(), seq).map_err(io_err)?;

                    if let Some(kind) = sighting {
                        append_sighting(&txn, msg_id, kind)?;
                    }
                },
            }
        }
        txn.commit().map_err(io_err)?;

        Ok(())
    }

    fn load_records<T: DeserializeOwned>(
        &self,
        log: TableDefinition<u64, &[u8]>,
    ) -> Result<Vec<T>, StoreError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let table = txn.open_table(log).map_err(io_err)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            records.push(serde_json::from_slice(value.value()).map_err(ser_err)?);
        }
        Ok(records)
    }
}

impl MeshStore for RedbStore {
    fn save_message(&self, env: &MessageEnvelope) -> Result<(), StoreError> {
        self.save_record(
            MESSAGES,
            MESSAGE_INDEX,
            env.msg_id,
            env,
            Some(EnvelopeKind::Message),
        )
    }

    fn save_key(&self, key: &KeyEnvelope) -> Result<(), StoreError> {
        self.save_record(KEYS, KEY_INDEX, key.msg_id, key, Some(EnvelopeKind::Key))
    }

    fn save_decrypted(&self, msg: &DecryptedMessage) -> Result<(), StoreError> {
        self.save_record(DECRYPTED, DECRYPTED_INDEX, msg.msg_id, msg, None)
    }

    fn messages(&self) -> Result<Vec<MessageEnvelope>, StoreError> {
        self.load_records(MESSAGES)
    }

    fn keys(&self) -> Result<Vec<KeyEnvelope>, StoreError> {
        self.load_records(KEYS)
    }

    fn decrypted(&self) -> Result<Vec<DecryptedMessage>, StoreError> {
        self.load_records(DECRYPTED)
    }

    fn recent_sightings(
        &self,
        limit: usize,
    ) -> Result<Vec<(MsgId, EnvelopeKind)>, StoreError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let table = txn.open_table(SIGHTINGS).map_err(io_err)?;

        let mut recent = Vec::with_capacity(limit);
        for entry in table.iter().map_err(io_err)?.rev().take(limit) {
            let (_, value) = entry.map_err(io_err)?;
            recent.push(decode_sighting(value.value())?);
        }
        recent.reverse();
        Ok(recent)
    }

    fn load_identity(&self) -> Result<Option<NodeIdentity>, StoreError> {
        let txn = self.db.begin_read().map_err(io_err)?;
        let table = txn.open_table(IDENTITY).map_err(io_err)?;

        match table.get(IDENTITY_KEY).map_err(io_err)? {
            Some(value) => {
                Ok(Some(serde_json::from_slice(value.value()).map_err(ser_err)?))
            },
            None => Ok(None),
        }
    }

    fn save_identity(&self, identity: &NodeIdentity) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(identity).map_err(ser_err)?;

        let txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = txn.open_table(IDENTITY).map_err(io_err)?;
            table.insert(IDENTITY_KEY, bytes.as_slice()).map_err(io_err)?;
        }
        txn.commit().map_err(io_err)?;

        Ok(())
    }
}

/// Next free sequence number in a log table.
fn next_seq<T: ReadableTable<u64, &'static [u8]>>(table: &T) -> Result<u64, StoreError> {
    Ok(table
        .last()
        .map_err(io_err)?
        .map(|(key, _)| key.value() + 1)
        .unwrap_or(0))
}

fn append_sighting(
    txn: &WriteTransaction,
    msg_id: MsgId,
    kind: EnvelopeKind,
) -> Result<(), StoreError> {
    let mut table = txn.open_table(SIGHTINGS).map_err(io_err)?;
    let seq = next_seq(&table)?;

    let mut value = [0u8; 17];
    value[0] = match kind {
        EnvelopeKind::Message => KIND_MESSAGE,
        EnvelopeKind::Key => KIND_KEY,
    };
    value[1..].copy_from_slice(&msg_id.to_bits().to_be_bytes());

    table.insert(seq, value.as_slice()).map_err(io_err)?;

    // The persisted window is FIFO-bounded like the in-memory dedupe store.
    if table.len().map_err(io_err)? > DEDUPE_CAPACITY as u64 {
        let _ = table.pop_first().map_err(io_err)?;
    }
    Ok(())
}

fn decode_sighting(value: &[u8]) -> Result<(MsgId, EnvelopeKind), StoreError> {
    if value.len() != 17 {
        return Err(StoreError::Corrupt(format!(
            "sighting record is {} bytes, expected 17",
            value.len()
        )));
    }

    let kind = match value[0] {
        KIND_MESSAGE => EnvelopeKind::Message,
        KIND_KEY => EnvelopeKind::Key,
        other => {
            return Err(StoreError::Corrupt(format!("unknown sighting kind {other}")));
        },
    };

    let bits = u128::from_be_bytes(
        value[1..].try_into().map_err(|_| StoreError::Corrupt("sighting id".into()))?,
    );
    Ok((MsgId::from_bits(bits), kind))
}

fn io_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Io(err.to_string())
}

fn ser_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(err.to_string())
}
