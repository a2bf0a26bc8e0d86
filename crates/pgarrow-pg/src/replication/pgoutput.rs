//! Decoder for PostgreSQL pgoutput logical replication protocol.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-logicalrep-message-formats.html

use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

use crate::error::{PgError, PgResult};

/// A decoded pgoutput message.
#[derive(Debug, Clone, PartialEq)]
pub enum PgOutputMessage {
    Begin(BeginMessage),
    Commit(CommitMessage),
    Relation(RelationMessage),
    Type(TypeMessage),
    Insert(InsertMessage),
    Update(UpdateMessage),
    Delete(DeleteMessage),
    Truncate(TruncateMessage),
    Origin(OriginMessage),
    Message(LogicalMessage),
}

impl PgOutputMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PgOutputMessage::Begin(_) => "begin",
            PgOutputMessage::Commit(_) => "commit",
            PgOutputMessage::Relation(_) => "relation",
            PgOutputMessage::Type(_) => "type",
            PgOutputMessage::Insert(_) => "insert",
            PgOutputMessage::Update(_) => "update",
            PgOutputMessage::Delete(_) => "delete",
            PgOutputMessage::Truncate(_) => "truncate",
            PgOutputMessage::Origin(_) => "origin",
            PgOutputMessage::Message(_) => "message",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginMessage {
    pub final_lsn: u64,
    pub timestamp: i64, // microseconds since 2000-01-01
    pub xid: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitMessage {
    pub flags: u8,
    pub commit_lsn: u64,
    pub end_lsn: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationMessage {
    pub relation_id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: ReplicaIdentity,
    pub columns: Vec<ColumnInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaIdentity {
    Default, // 'd' - primary key
    Nothing, // 'n'
    Full,    // 'f' - all columns
    Index,   // 'i' - unique index
}

impl TryFrom<u8> for ReplicaIdentity {
    type Error = PgError;

    fn try_from(b: u8) -> PgResult<Self> {
        match b {
            b'd' => Ok(ReplicaIdentity::Default),
            b'n' => Ok(ReplicaIdentity::Nothing),
            b'f' => Ok(ReplicaIdentity::Full),
            b'i' => Ok(ReplicaIdentity::Index),
            other => Err(PgError::Protocol(format!(
                "unknown replica identity setting 0x{:02X}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub flags: u8,
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
}

impl ColumnInfo {
    /// Whether the column is part of the replica identity.
    pub fn is_identity(&self) -> bool {
        self.flags & 1 == 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeMessage {
    pub type_id: u32,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertMessage {
    pub relation_id: u32,
    pub tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessage {
    pub relation_id: u32,
    pub old_tuple: Option<TupleData>,
    pub new_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMessage {
    pub relation_id: u32,
    pub old_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TruncateMessage {
    pub options: u8,
    pub relation_ids: Vec<u32>,
}

impl TruncateMessage {
    pub fn cascade(&self) -> bool {
        self.options & 1 != 0
    }

    pub fn restart_identity(&self) -> bool {
        self.options & 2 != 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OriginMessage {
    pub origin_lsn: u64,
    pub origin_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    pub flags: u8,
    pub lsn: u64,
    pub prefix: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupleData {
    pub columns: Vec<TupleValue>,
}

/// A single column entry of a wire tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum TupleValue {
    Null,
    Unchanged, // TOASTed value unchanged
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

/// Decoder for pgoutput binary protocol messages.
#[derive(Debug, Default)]
pub struct PgOutputDecoder;

impl PgOutputDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode a pgoutput message from raw bytes.
    pub fn decode(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let Some((&msg_type, payload)) = data.split_first() else {
            return Err(PgError::Protocol("empty message".into()));
        };

        match msg_type {
            b'B' => self.decode_begin(payload),
            b'C' => self.decode_commit(payload),
            b'R' => self.decode_relation(payload),
            b'Y' => self.decode_type(payload),
            b'I' => self.decode_insert(payload),
            b'U' => self.decode_update(payload),
            b'D' => self.decode_delete(payload),
            b'T' => self.decode_truncate(payload),
            b'O' => self.decode_origin(payload),
            b'M' => self.decode_message(payload),
            other => Err(PgError::Protocol(format!(
                "unknown message type: {} (0x{:02X})",
                other as char, other
            ))),
        }
    }

    fn decode_begin(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let final_lsn = cursor.read_u64::<BigEndian>()?;
        let timestamp = cursor.read_i64::<BigEndian>()?;
        let xid = cursor.read_u32::<BigEndian>()?;

        Ok(PgOutputMessage::Begin(BeginMessage {
            final_lsn,
            timestamp,
            xid,
        }))
    }

    fn decode_commit(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let flags = cursor.read_u8()?;
        let commit_lsn = cursor.read_u64::<BigEndian>()?;
        let end_lsn = cursor.read_u64::<BigEndian>()?;
        let timestamp = cursor.read_i64::<BigEndian>()?;

        Ok(PgOutputMessage::Commit(CommitMessage {
            flags,
            commit_lsn,
            end_lsn,
            timestamp,
        }))
    }

    fn decode_relation(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let relation_id = cursor.read_u32::<BigEndian>()?;
        let namespace = read_string(&mut cursor)?;
        let name = read_string(&mut cursor)?;
        let replica_identity = ReplicaIdentity::try_from(cursor.read_u8()?)?;
        let num_columns = read_count(&mut cursor)?;

        let mut columns = Vec::with_capacity(num_columns);
        for _ in 0..num_columns {
            let flags = cursor.read_u8()?;
            let col_name = read_string(&mut cursor)?;
            let type_oid = cursor.read_u32::<BigEndian>()?;
            let type_modifier = cursor.read_i32::<BigEndian>()?;

            columns.push(ColumnInfo {
                flags,
                name: col_name,
                type_oid,
                type_modifier,
            });
        }

        Ok(PgOutputMessage::Relation(RelationMessage {
            relation_id,
            namespace,
            name,
            replica_identity,
            columns,
        }))
    }

    fn decode_type(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let type_id = cursor.read_u32::<BigEndian>()?;
        let namespace = read_string(&mut cursor)?;
        let name = read_string(&mut cursor)?;

        Ok(PgOutputMessage::Type(TypeMessage {
            type_id,
            namespace,
            name,
        }))
    }

    fn decode_insert(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let relation_id = cursor.read_u32::<BigEndian>()?;
        expect_marker(&mut cursor, b'N', "insert")?;
        let tuple = decode_tuple(&mut cursor)?;

        Ok(PgOutputMessage::Insert(InsertMessage { relation_id, tuple }))
    }

    fn decode_update(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let relation_id = cursor.read_u32::<BigEndian>()?;

        let (old_tuple, new_tuple) = match cursor.read_u8()? {
            // K = key columns only, O = full old row
            b'K' | b'O' => {
                let old = decode_tuple(&mut cursor)?;
                expect_marker(&mut cursor, b'N', "update")?;
                (Some(old), decode_tuple(&mut cursor)?)
            }
            b'N' => (None, decode_tuple(&mut cursor)?),
            other => {
                return Err(PgError::Protocol(format!(
                    "unexpected tuple type in update: '{}'",
                    other as char
                )));
            }
        };

        Ok(PgOutputMessage::Update(UpdateMessage {
            relation_id,
            old_tuple,
            new_tuple,
        }))
    }

    fn decode_delete(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let relation_id = cursor.read_u32::<BigEndian>()?;
        let tuple_type = cursor.read_u8()?;

        if tuple_type != b'K' && tuple_type != b'O' {
            return Err(PgError::Protocol(format!(
                "expected 'K' or 'O' for delete tuple, got '{}'",
                tuple_type as char
            )));
        }

        let old_tuple = decode_tuple(&mut cursor)?;

        Ok(PgOutputMessage::Delete(DeleteMessage {
            relation_id,
            old_tuple,
        }))
    }

    fn decode_truncate(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let num_relations = cursor.read_u32::<BigEndian>()? as usize;
        let options = cursor.read_u8()?;

        let mut relation_ids = Vec::with_capacity(num_relations.min(remaining(&cursor) / 4));
        for _ in 0..num_relations {
            relation_ids.push(cursor.read_u32::<BigEndian>()?);
        }

        Ok(PgOutputMessage::Truncate(TruncateMessage {
            options,
            relation_ids,
        }))
    }

    fn decode_origin(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let origin_lsn = cursor.read_u64::<BigEndian>()?;
        let origin_name = read_string(&mut cursor)?;

        Ok(PgOutputMessage::Origin(OriginMessage {
            origin_lsn,
            origin_name,
        }))
    }

    fn decode_message(&self, data: &[u8]) -> PgResult<PgOutputMessage> {
        let mut cursor = Cursor::new(data);
        let flags = cursor.read_u8()?;
        let lsn = cursor.read_u64::<BigEndian>()?;
        let prefix = read_string(&mut cursor)?;
        let content_len = cursor.read_u32::<BigEndian>()? as usize;
        let content = read_bytes(&mut cursor, content_len)?;

        Ok(PgOutputMessage::Message(LogicalMessage {
            flags,
            lsn,
            prefix,
            content,
        }))
    }
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor
        .get_ref()
        .len()
        .saturating_sub(cursor.position() as usize)
}

fn expect_marker(cursor: &mut Cursor<&[u8]>, marker: u8, message: &str) -> PgResult<()> {
    let found = cursor.read_u8()?;
    if found != marker {
        return Err(PgError::Protocol(format!(
            "expected '{}' tuple in {}, got '{}'",
            marker as char, message, found as char
        )));
    }
    Ok(())
}

fn read_count(cursor: &mut Cursor<&[u8]>) -> PgResult<usize> {
    let count = cursor.read_i16::<BigEndian>()?;
    usize::try_from(count).map_err(|_| PgError::Protocol(format!("negative column count {}", count)))
}

/// Read `len` bytes, refusing lengths longer than what is left in the message.
fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> PgResult<Vec<u8>> {
    if len > remaining(cursor) {
        return Err(PgError::Protocol(format!(
            "value length {} exceeds remaining {} bytes",
            len,
            remaining(cursor)
        )));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

fn decode_tuple(cursor: &mut Cursor<&[u8]>) -> PgResult<TupleData> {
    let num_columns = read_count(cursor)?;
    let mut columns = Vec::with_capacity(num_columns);

    for _ in 0..num_columns {
        let value = match cursor.read_u8()? {
            b'n' => TupleValue::Null,
            b'u' => TupleValue::Unchanged,
            kind @ (b't' | b'b') => {
                let len = cursor.read_i32::<BigEndian>()?;
                let len = usize::try_from(len)
                    .map_err(|_| PgError::Protocol(format!("negative value length {}", len)))?;
                let buf = read_bytes(cursor, len)?;
                if kind == b't' {
                    TupleValue::Text(buf)
                } else {
                    TupleValue::Binary(buf)
                }
            }
            other => {
                return Err(PgError::Protocol(format!(
                    "unknown column value type: '{}' (0x{:02X})",
                    other as char, other
                )));
            }
        };
        columns.push(value);
    }

    Ok(TupleData { columns })
}

/// Read a null-terminated string.
fn read_string(cursor: &mut Cursor<&[u8]>) -> PgResult<String> {
    let mut bytes = Vec::new();
    loop {
        let b = cursor.read_u8()?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
