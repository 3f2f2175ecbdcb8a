//! SQLite schema for the librarian catalog.

use crate::sqlite_column;
use crate::sqlite_persistence::{ForeignKey, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

const CONTENT_TABLE_V0: Table = Table {
    name: "library_file_content",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            autoincrement = true
        ),
        sqlite_column!("size", &SqlType::Integer, non_null = true),
        sqlite_column!("digest", &SqlType::Text, non_null = true),
        sqlite_column!("restricted", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "deleted",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("migrated_at", &SqlType::Integer),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[
        ("idx_content_digest", "digest"),
        ("idx_content_unmigrated", "restricted, migrated_at"),
    ],
};

const CONTENT_FK: ForeignKey = ForeignKey {
    foreign_table: "library_file_content",
    foreign_column: "id",
};

const ALIAS_TABLE_V0: Table = Table {
    name: "library_file_alias",
    columns: &[
        sqlite_column!(
            "id",
            &SqlType::Integer,
            is_primary_key = true,
            autoincrement = true
        ),
        sqlite_column!(
            "content_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&CONTENT_FK)
        ),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
        sqlite_column!("mime_type", &SqlType::Text, non_null = true),
        sqlite_column!("expires", &SqlType::Integer),
        sqlite_column!("restricted", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "deleted",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_alias_content", "content_id")],
};

pub const CATALOG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[CONTENT_TABLE_V0, ALIAS_TABLE_V0],
    migration: None,
}];
