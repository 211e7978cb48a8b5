//! Schema-object descriptors captured in backup manifests.
//!
//! Descriptors are modeled as a tagged union with exhaustive matching so a
//! newly added object kind cannot be silently ignored by restore planning.

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Unique ID of a schema object.
pub type ObjectId = u64;

/// A table, keyed under its containing database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub id: ObjectId,
    /// ID of the database containing this table.
    pub parent_id: ObjectId,
    pub name: String,
    pub version: u32,
    pub modification_time: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    pub id: ObjectId,
    pub name: String,
    pub version: u32,
    pub modification_time: Timestamp,
}

/// A user-defined type, keyed under its containing database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub id: ObjectId,
    pub parent_id: ObjectId,
    pub name: String,
    pub version: u32,
    pub modification_time: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub id: ObjectId,
    /// ID of the database containing this schema.
    pub parent_id: ObjectId,
    pub name: String,
    pub version: u32,
    pub modification_time: Timestamp,
}

/// One schema object as captured in a backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObjectDescriptor {
    Table(TableDescriptor),
    Database(DatabaseDescriptor),
    Type(TypeDescriptor),
    Schema(SchemaDescriptor),
}

impl ObjectDescriptor {
    pub fn id(&self) -> ObjectId {
        match self {
            ObjectDescriptor::Table(d) => d.id,
            ObjectDescriptor::Database(d) => d.id,
            ObjectDescriptor::Type(d) => d.id,
            ObjectDescriptor::Schema(d) => d.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ObjectDescriptor::Table(d) => &d.name,
            ObjectDescriptor::Database(d) => &d.name,
            ObjectDescriptor::Type(d) => &d.name,
            ObjectDescriptor::Schema(d) => &d.name,
        }
    }

    pub fn version(&self) -> u32 {
        match self {
            ObjectDescriptor::Table(d) => d.version,
            ObjectDescriptor::Database(d) => d.version,
            ObjectDescriptor::Type(d) => d.version,
            ObjectDescriptor::Schema(d) => d.version,
        }
    }

    pub fn modification_time(&self) -> Timestamp {
        match self {
            ObjectDescriptor::Table(d) => d.modification_time,
            ObjectDescriptor::Database(d) => d.modification_time,
            ObjectDescriptor::Type(d) => d.modification_time,
            ObjectDescriptor::Schema(d) => d.modification_time,
        }
    }

    /// ID of the containing database, for object kinds that have one.
    pub fn parent_id(&self) -> Option<ObjectId> {
        match self {
            ObjectDescriptor::Table(d) => Some(d.parent_id),
            ObjectDescriptor::Database(_) => None,
            ObjectDescriptor::Type(d) => Some(d.parent_id),
            ObjectDescriptor::Schema(d) => Some(d.parent_id),
        }
    }

    /// Whether this object must not be exposed without its parent also
    /// present: tables and types live inside a database and are dropped by
    /// time-travel reconstruction when the database was not captured.
    pub fn requires_parent(&self) -> bool {
        match self {
            ObjectDescriptor::Table(_) | ObjectDescriptor::Type(_) => true,
            ObjectDescriptor::Database(_) | ObjectDescriptor::Schema(_) => false,
        }
    }

    /// Backwards compatibility with backups written before modification times
    /// were reliably populated: a version-1 descriptor with an unset time is
    /// pinned to the minimum non-zero timestamp.
    pub fn backfill_modification_time(&mut self) {
        let (version, modification_time) = match self {
            ObjectDescriptor::Table(d) => (d.version, &mut d.modification_time),
            ObjectDescriptor::Database(d) => (d.version, &mut d.modification_time),
            ObjectDescriptor::Type(d) => (d.version, &mut d.modification_time),
            ObjectDescriptor::Schema(d) => (d.version, &mut d.modification_time),
        };
        if version == 1 && modification_time.is_empty() {
            *modification_time = Timestamp::MIN;
        }
    }
}
