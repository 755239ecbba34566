// Copyright Tern Data, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Assembly of the immutable tablet metadata record sent to the metadata
//! service when a tablet is created.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tern_cluster_client::{IndexId, PartitionId, ReplicaId, TableId, TabletId};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Rows per row block in newly created tablets.
const NUM_ROWS_PER_ROW_BLOCK: u32 = 1024;

/// A catalog-to-wire enum value that the wire format does not recognize.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("invalid key type: {0}")]
    InvalidKeysType(i32),
    #[error("invalid sort type: {0}")]
    InvalidSortType(i32),
}

/// The key model of a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeysType {
    Duplicate,
    Unique,
    Aggregate,
}

impl TryFrom<i32> for KeysType {
    type Error = EncodeError;

    fn try_from(code: i32) -> Result<Self, EncodeError> {
        match code {
            0 => Ok(KeysType::Duplicate),
            1 => Ok(KeysType::Unique),
            2 => Ok(KeysType::Aggregate),
            other => Err(EncodeError::InvalidKeysType(other)),
        }
    }
}

/// The sort order of rows within a tablet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortType {
    Lexical,
    ZOrder,
}

impl TryFrom<i32> for SortType {
    type Error = EncodeError;

    fn try_from(code: i32) -> Result<Self, EncodeError> {
        match code {
            0 => Ok(SortType::Lexical),
            1 => Ok(SortType::ZOrder),
            other => Err(EncodeError::InvalidSortType(other)),
        }
    }
}

/// The codec requested for a table.
///
/// `Unknown` and `Default` are legal catalog values; the wire mapping
/// falls back to a default codec for them (and would for any future
/// codec value), a deliberately permissive policy for forward
/// compatibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionKind {
    Unknown,
    Default,
    None,
    Snappy,
    Lz4,
    Lz4f,
    Zlib,
    Zstd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireKeysType {
    DupKeys,
    UniqueKeys,
    AggKeys,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireSortType {
    Lexical,
    ZOrder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireCompression {
    NoCompression,
    Snappy,
    Lz4,
    Lz4f,
    Zlib,
    Zstd,
}

/// One column of a tablet schema, as recorded in the metadata service.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: String,
    pub is_key: bool,
    pub is_nullable: bool,
    pub aggregation: Option<String>,
    pub is_bloom_filter: bool,
    /// Marks the hidden column recording logical deletes.
    pub is_delete_sign: bool,
    /// Marks the column ordering upserts of the same key.
    pub is_sequence: bool,
}

/// A secondary index over a tablet schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexSpec {
    pub index_id: i64,
    pub name: String,
    pub index_type: String,
    pub columns: Vec<String>,
}

/// The logical schema of one materialized index, as the DDL layer hands
/// it to the builder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TabletSchema {
    pub schema_version: i32,
    pub schema_hash: i32,
    pub keys_type: KeysType,
    pub short_key_column_count: u16,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
    pub sort_type: SortType,
    pub sort_col_num: i32,
    pub compression: CompressionKind,
    pub bloom_filter_fpp: f64,
    pub store_row_column: bool,
    pub enable_unique_key_merge_on_write: bool,
}

/// Identity of the tablet a metadata record is being built for.
#[derive(Clone, Copy, Debug)]
pub struct TabletIdentity<'a> {
    pub table_id: TableId,
    pub index_id: IndexId,
    pub partition_id: PartitionId,
    pub tablet_id: TabletId,
    pub replica_id: ReplicaId,
    pub table_name: &'a str,
    pub ttl_seconds: i64,
    pub in_memory: bool,
    /// Shadow tablets (schema change targets) start out not ready.
    pub is_shadow: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabletState {
    Running,
    NotReady,
}

/// A freshly generated unique tablet identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletUid {
    pub hi: u64,
    pub lo: u64,
}

impl TabletUid {
    fn generate() -> Self {
        let (hi, lo) = Uuid::new_v4().as_u64_pair();
        TabletUid { hi, lo }
    }
}

/// The wire form of a tablet schema.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireTabletSchema {
    pub schema_version: i32,
    pub keys_type: WireKeysType,
    pub num_short_key_columns: u16,
    pub num_rows_per_row_block: u32,
    pub compression: WireCompression,
    pub bloom_filter_fpp: f64,
    /// Position of the delete-sign column, or -1.
    pub delete_sign_idx: i32,
    /// Position of the sequence column, or -1.
    pub sequence_col_idx: i32,
    pub sort_type: WireSortType,
    pub sort_col_num: i32,
    pub store_row_column: bool,
    pub columns: Vec<ColumnSpec>,
    pub indexes: Vec<IndexSpec>,
}

/// An immutable description of a tablet at creation time. Built once,
/// sent to the metadata service, never mutated locally afterward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TabletMetadataRecord {
    pub table_id: TableId,
    pub index_id: IndexId,
    pub partition_id: PartitionId,
    pub tablet_id: TabletId,
    pub replica_id: ReplicaId,
    pub table_name: String,
    pub creation_time_s: i64,
    pub tablet_state: TabletState,
    pub in_memory: bool,
    pub ttl_seconds: i64,
    pub schema_version: i32,
    pub tablet_uid: TabletUid,
    pub enable_unique_key_merge_on_write: bool,
    pub schema: WireTabletSchema,
    /// Exactly one initial empty rowset at creation time.
    pub rowsets: Vec<RowsetMetadata>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowsetState {
    Visible,
}

/// The initial empty storage segment of a new tablet: version range
/// `[0, 1)`, zero rows, zero bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RowsetMetadata {
    pub rowset_id: i64,
    pub rowset_id_v2: String,
    pub partition_id: PartitionId,
    pub tablet_id: TabletId,
    pub tablet_schema_hash: i32,
    pub state: RowsetState,
    pub start_version: i64,
    pub end_version: i64,
    pub num_rows: i64,
    pub total_disk_size: i64,
    pub data_disk_size: i64,
    pub index_disk_size: i64,
    pub num_segments: i64,
    pub empty: bool,
}

/// Assembles the metadata record for a new tablet.
///
/// Deterministic for fixed inputs except for the freshly generated
/// tablet uid and rowset id.
pub fn build_tablet_metadata(
    identity: &TabletIdentity,
    schema: &TabletSchema,
) -> TabletMetadataRecord {
    let keys_type = match schema.keys_type {
        KeysType::Duplicate => WireKeysType::DupKeys,
        KeysType::Unique => WireKeysType::UniqueKeys,
        KeysType::Aggregate => WireKeysType::AggKeys,
    };
    let sort_type = match schema.sort_type {
        SortType::Lexical => WireSortType::Lexical,
        SortType::ZOrder => WireSortType::ZOrder,
    };
    let compression = match schema.compression {
        CompressionKind::None => WireCompression::NoCompression,
        CompressionKind::Snappy => WireCompression::Snappy,
        CompressionKind::Lz4 => WireCompression::Lz4,
        CompressionKind::Lz4f => WireCompression::Lz4f,
        CompressionKind::Zlib => WireCompression::Zlib,
        CompressionKind::Zstd => WireCompression::Zstd,
        // Permissive fallback for unmapped codec values.
        CompressionKind::Unknown | CompressionKind::Default => WireCompression::Lz4f,
    };

    let mut delete_sign_idx = -1;
    let mut sequence_col_idx = -1;
    for (i, column) in schema.columns.iter().enumerate() {
        let i = i32::try_from(i).unwrap_or(i32::MAX);
        if column.is_delete_sign {
            if delete_sign_idx != -1 {
                warn!(column = %column.name, "multiple delete sign columns; last one wins");
            }
            delete_sign_idx = i;
        }
        if column.is_sequence {
            if sequence_col_idx != -1 {
                warn!(column = %column.name, "multiple sequence columns; last one wins");
            }
            sequence_col_idx = i;
        }
    }

    let wire_schema = WireTabletSchema {
        schema_version: schema.schema_version,
        keys_type,
        num_short_key_columns: schema.short_key_column_count,
        num_rows_per_row_block: NUM_ROWS_PER_ROW_BLOCK,
        compression,
        bloom_filter_fpp: schema.bloom_filter_fpp,
        delete_sign_idx,
        sequence_col_idx,
        sort_type,
        sort_col_num: schema.sort_col_num,
        store_row_column: schema.store_row_column,
        columns: schema.columns.clone(),
        indexes: schema.indexes.clone(),
    };

    TabletMetadataRecord {
        table_id: identity.table_id,
        index_id: identity.index_id,
        partition_id: identity.partition_id,
        tablet_id: identity.tablet_id,
        replica_id: identity.replica_id,
        table_name: identity.table_name.to_string(),
        creation_time_s: now_s(),
        tablet_state: if identity.is_shadow {
            TabletState::NotReady
        } else {
            TabletState::Running
        },
        in_memory: identity.in_memory,
        ttl_seconds: identity.ttl_seconds,
        schema_version: schema.schema_version,
        tablet_uid: TabletUid::generate(),
        enable_unique_key_merge_on_write: schema.enable_unique_key_merge_on_write,
        schema: wire_schema,
        rowsets: vec![initial_rowset(
            identity.tablet_id,
            identity.partition_id,
            schema.schema_hash,
        )],
    }
}

/// The initial empty rowset of a new tablet.
fn initial_rowset(
    tablet_id: TabletId,
    partition_id: PartitionId,
    schema_hash: i32,
) -> RowsetMetadata {
    let uuid = Uuid::new_v4();
    let (hi, lo) = uuid.as_u64_pair();
    let rowset_id_v2 = format!("{:016X}{:016X}{:016X}", 2u64 << 56, hi, lo);
    RowsetMetadata {
        rowset_id: 0,
        rowset_id_v2,
        partition_id,
        tablet_id,
        tablet_schema_hash: schema_hash,
        state: RowsetState::Visible,
        start_version: 0,
        end_version: 1,
        num_rows: 0,
        total_disk_size: 0,
        data_disk_size: 0,
        index_disk_size: 0,
        num_segments: 0,
        empty: true,
    }
}

fn now_s() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            column_type: "BIGINT".into(),
            ..Default::default()
        }
    }

    fn schema() -> TabletSchema {
        TabletSchema {
            schema_version: 1,
            schema_hash: 12345,
            keys_type: KeysType::Unique,
            short_key_column_count: 1,
            columns: vec![
                column("k"),
                ColumnSpec {
                    is_delete_sign: true,
                    ..column("__delete_sign__")
                },
                ColumnSpec {
                    is_sequence: true,
                    ..column("__sequence__")
                },
            ],
            indexes: vec![],
            sort_type: SortType::Lexical,
            sort_col_num: 1,
            compression: CompressionKind::Lz4,
            bloom_filter_fpp: 0.05,
            store_row_column: false,
            enable_unique_key_merge_on_write: true,
        }
    }

    fn identity() -> TabletIdentity<'static> {
        TabletIdentity {
            table_id: TableId(10),
            index_id: IndexId(100),
            partition_id: PartitionId(7),
            tablet_id: TabletId(1000),
            replica_id: ReplicaId(1),
            table_name: "t",
            ttl_seconds: 0,
            in_memory: false,
            is_shadow: false,
        }
    }

    #[test]
    fn records_special_column_positions() {
        let record = build_tablet_metadata(&identity(), &schema());
        assert_eq!(record.schema.delete_sign_idx, 1);
        assert_eq!(record.schema.sequence_col_idx, 2);
    }

    #[test]
    fn missing_special_columns_record_minus_one() {
        let mut schema = schema();
        schema.columns = vec![column("k"), column("v")];
        let record = build_tablet_metadata(&identity(), &schema);
        assert_eq!(record.schema.delete_sign_idx, -1);
        assert_eq!(record.schema.sequence_col_idx, -1);
    }

    #[test]
    fn duplicate_flags_take_the_last_match() {
        let mut schema = schema();
        schema.columns.push(ColumnSpec {
            is_delete_sign: true,
            ..column("dup")
        });
        let record = build_tablet_metadata(&identity(), &schema);
        assert_eq!(record.schema.delete_sign_idx, 3);
    }

    #[test]
    fn uids_are_unique_across_builds() {
        let a = build_tablet_metadata(&identity(), &schema());
        let b = build_tablet_metadata(&identity(), &schema());
        assert_ne!(a.tablet_uid, b.tablet_uid);
        assert_ne!(a.rowsets[0].rowset_id_v2, b.rowsets[0].rowset_id_v2);
        // 16 hex chars of prefix plus 32 of uuid.
        assert_eq!(a.rowsets[0].rowset_id_v2.len(), 48);
        assert!(a.rowsets[0].rowset_id_v2.starts_with("0200000000000000"));
    }

    #[test]
    fn initial_rowset_is_empty() {
        let record = build_tablet_metadata(&identity(), &schema());
        assert_eq!(record.rowsets.len(), 1);
        let rowset = &record.rowsets[0];
        assert_eq!((rowset.start_version, rowset.end_version), (0, 1));
        assert_eq!(rowset.num_rows, 0);
        assert_eq!(rowset.total_disk_size, 0);
        assert!(rowset.empty);
        assert_eq!(rowset.tablet_schema_hash, 12345);
    }

    #[test]
    fn compression_falls_back_to_default_codec() {
        for kind in [CompressionKind::Unknown, CompressionKind::Default] {
            let mut schema = schema();
            schema.compression = kind;
            let record = build_tablet_metadata(&identity(), &schema);
            assert_eq!(record.schema.compression, WireCompression::Lz4f);
        }
    }

    #[test]
    fn unknown_codes_fail_to_decode() {
        assert_eq!(KeysType::try_from(1), Ok(KeysType::Unique));
        assert_eq!(KeysType::try_from(9), Err(EncodeError::InvalidKeysType(9)));
        assert_eq!(SortType::try_from(1), Ok(SortType::ZOrder));
        assert_eq!(SortType::try_from(7), Err(EncodeError::InvalidSortType(7)));
    }

    #[test]
    fn shadow_tablets_start_not_ready() {
        let mut identity = identity();
        identity.is_shadow = true;
        let record = build_tablet_metadata(&identity, &schema());
        assert_eq!(record.tablet_state, TabletState::NotReady);
    }
}
