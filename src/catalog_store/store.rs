//! SQLite-backed catalog.

use super::models::*;
use super::schema::CATALOG_VERSIONED_SCHEMAS;
use super::trait_def::{Catalog, PlaceContent};
use crate::partition::Partition;
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

const RESOLVED_ALIAS_SELECT: &str = "SELECT a.id, a.content_id, a.filename, a.mime_type, \
     a.expires, a.restricted, a.deleted, a.created_at, \
     c.size, c.digest, c.restricted, c.deleted, c.migrated_at, c.created_at \
     FROM library_file_alias a JOIN library_file_content c ON c.id = a.content_id";

const CONTENT_SELECT: &str = "SELECT id, size, digest, restricted, deleted, migrated_at, created_at \
     FROM library_file_content";

#[derive(Clone)]
pub struct SqliteCatalog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalog {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let mut conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog database {:?}", path))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        open_versioned(&mut conn, CATALOG_VERSIONED_SCHEMAS)?;

        let content_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM library_file_content", [], |r| r.get(0))?;
        info!(
            "Opened librarian catalog at {:?}: {} content rows",
            path, content_count
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Catalog connection mutex poisoned"))
    }

    fn row_to_content(row: &Row, offset: usize) -> rusqlite::Result<LibraryFileContent> {
        Ok(LibraryFileContent {
            id: row.get(offset)?,
            size: row.get::<_, i64>(offset + 1)? as u64,
            digest: row.get(offset + 2)?,
            restricted: row.get(offset + 3)?,
            deleted: row.get(offset + 4)?,
            migrated_at: row.get(offset + 5)?,
            created_at: row.get(offset + 6)?,
        })
    }

    fn row_to_resolved(row: &Row) -> rusqlite::Result<ResolvedAlias> {
        let alias = LibraryFileAlias {
            id: row.get(0)?,
            content_id: row.get(1)?,
            filename: row.get(2)?,
            mime_type: row.get(3)?,
            expires: row.get(4)?,
            restricted: row.get(5)?,
            deleted: row.get(6)?,
            created_at: row.get(7)?,
        };
        let content = LibraryFileContent {
            id: alias.content_id,
            size: row.get::<_, i64>(8)? as u64,
            digest: row.get(9)?,
            restricted: row.get(10)?,
            deleted: row.get(11)?,
            migrated_at: row.get(12)?,
            created_at: row.get(13)?,
        };
        Ok(ResolvedAlias { alias, content })
    }
}

impl Catalog for SqliteCatalog {
    fn add_file(
        &self,
        partition: Partition,
        file: &NewLibraryFile,
        place: PlaceContent<'_>,
    ) -> Result<(ContentId, AliasId)> {
        let now = chrono::Utc::now().timestamp();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO library_file_content (size, digest, restricted, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![
                file.size as i64,
                file.digest.to_ascii_lowercase(),
                partition.is_restricted(),
                now
            ],
        )?;
        let content_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO library_file_alias \
             (content_id, filename, mime_type, expires, restricted, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                content_id,
                file.filename,
                file.mime_type,
                file.expires,
                partition.is_restricted(),
                now
            ],
        )?;
        let alias_id = tx.last_insert_rowid();

        place(content_id)?;
        tx.commit().context("Failed to commit upload transaction")?;
        Ok((content_id, alias_id))
    }

    fn get_alias(&self, partition: Partition, alias_id: AliasId) -> Result<Option<ResolvedAlias>> {
        let conn = self.conn()?;
        let resolved = conn
            .query_row(
                &format!("{} WHERE a.id = ?1 AND a.restricted = ?2", RESOLVED_ALIAS_SELECT),
                params![alias_id, partition.is_restricted()],
                Self::row_to_resolved,
            )
            .optional()?;
        Ok(resolved)
    }

    fn get_content(
        &self,
        partition: Partition,
        content_id: ContentId,
    ) -> Result<Option<LibraryFileContent>> {
        let conn = self.conn()?;
        let content = conn
            .query_row(
                &format!("{} WHERE id = ?1 AND restricted = ?2", CONTENT_SELECT),
                params![content_id, partition.is_restricted()],
                |row| Self::row_to_content(row, 0),
            )
            .optional()?;
        Ok(content)
    }

    fn find_by_digest(
        &self,
        partition: Partition,
        digest: &str,
        now: i64,
    ) -> Result<Vec<ResolvedAlias>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE c.digest = ?1 AND a.restricted = ?2 AND a.deleted = 0 AND c.deleted = 0 \
             AND (a.expires IS NULL OR a.expires > ?3) ORDER BY a.id",
            RESOLVED_ALIAS_SELECT
        ))?;
        let rows = stmt
            .query_map(
                params![digest.to_ascii_lowercase(), partition.is_restricted(), now],
                Self::row_to_resolved,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn delete_alias(&self, partition: Partition, alias_id: AliasId) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE library_file_alias SET deleted = 1 WHERE id = ?1 AND restricted = ?2",
            params![alias_id, partition.is_restricted()],
        )?;
        Ok(changed > 0)
    }

    fn unmigrated_content(
        &self,
        partition: Partition,
        after: ContentId,
        limit: usize,
    ) -> Result<Vec<LibraryFileContent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE restricted = ?1 AND migrated_at IS NULL AND deleted = 0 AND id > ?2 \
             ORDER BY id LIMIT ?3",
            CONTENT_SELECT
        ))?;
        let rows = stmt
            .query_map(
                params![partition.is_restricted(), after, limit as i64],
                |row| Self::row_to_content(row, 0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn mark_migrated(&self, partition: Partition, content_id: ContentId, at: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE library_file_content SET migrated_at = ?1 WHERE id = ?2 AND restricted = ?3",
            params![at, content_id, partition.is_restricted()],
        )?;
        Ok(())
    }

    fn expire_aliases(&self, partition: Partition, cutoff: i64) -> Result<usize> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE library_file_alias SET deleted = 1 \
             WHERE restricted = ?1 AND deleted = 0 AND expires IS NOT NULL AND expires <= ?2",
            params![partition.is_restricted(), cutoff],
        )?;
        Ok(changed)
    }

    fn duplicate_groups(&self, partition: Partition) -> Result<Vec<DuplicateGroup>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT digest, size, MIN(id) FROM library_file_content \
             WHERE restricted = ?1 AND deleted = 0 \
             GROUP BY digest, size HAVING COUNT(*) > 1",
        )?;
        let keys = stmt
            .query_map(params![partition.is_restricted()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, ContentId>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups = Vec::with_capacity(keys.len());
        let mut dup_stmt = conn.prepare(
            "SELECT id FROM library_file_content \
             WHERE digest = ?1 AND size = ?2 AND restricted = ?3 AND deleted = 0 AND id != ?4 \
             ORDER BY id",
        )?;
        for (digest, size, keep) in keys {
            let duplicates = dup_stmt
                .query_map(
                    params![digest, size, partition.is_restricted(), keep],
                    |row| row.get::<_, ContentId>(0),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            groups.push(DuplicateGroup { keep, duplicates });
        }
        Ok(groups)
    }

    fn repoint_aliases(
        &self,
        partition: Partition,
        from: &[ContentId],
        to: ContentId,
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut moved = 0;
        for content_id in from {
            moved += tx.execute(
                "UPDATE library_file_alias SET content_id = ?1 \
                 WHERE content_id = ?2 AND restricted = ?3",
                params![to, content_id, partition.is_restricted()],
            )?;
        }
        tx.commit()?;
        Ok(moved)
    }

    fn unreferenced_content(
        &self,
        partition: Partition,
        created_before: i64,
    ) -> Result<Vec<LibraryFileContent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{} c WHERE c.restricted = ?1 AND c.created_at <= ?2 AND NOT EXISTS \
             (SELECT 1 FROM library_file_alias a WHERE a.content_id = c.id AND a.deleted = 0) \
             ORDER BY c.id",
            CONTENT_SELECT
        ))?;
        let rows = stmt
            .query_map(params![partition.is_restricted(), created_before], |row| {
                Self::row_to_content(row, 0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn purge_content(&self, partition: Partition, content_id: ContentId) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let live_aliases: i64 = tx.query_row(
            "SELECT COUNT(*) FROM library_file_alias WHERE content_id = ?1 AND deleted = 0",
            params![content_id],
            |r| r.get(0),
        )?;
        if live_aliases > 0 {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM library_file_alias WHERE content_id = ?1",
            params![content_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM library_file_content WHERE id = ?1 AND restricted = ?2",
            params![content_id, partition.is_restricted()],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn stats(&self, partition: Partition) -> Result<CatalogStats> {
        let conn = self.conn()?;
        let (count, bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM library_file_content \
             WHERE restricted = ?1 AND deleted = 0",
            params![partition.is_restricted()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(CatalogStats {
            content_count: count as u64,
            total_bytes: bytes as u64,
        })
    }
}
