use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::model::{AddressRange, CallingString, Direction, FunctionFingerprint, InteriorString};
use crate::store::{FingerprintDump, SourceImage, StoreError, StoreResult};

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: u32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQLite-backed fingerprint dump.
///
/// Fallback callees are rows whose `parent_id` points at their owner; every evidence row
/// carries a `seq` column so load order matches save order.
#[derive(Debug)]
pub struct FingerprintDb {
    conn: Connection,
}

struct FingerprintRow {
    id: i64,
    parent_id: Option<i64>,
    name: String,
    start: u64,
    end: u64,
}

impl FingerprintDb {
    /// Open (or create) a dump database at the given path and ensure the schema exists.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Expose a reference to the underlying connection for advanced callers.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Replace the stored dump with `dump`.
    pub fn save(&self, dump: &FingerprintDump) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute_batch(
            r#"
            DELETE FROM calling_strings;
            DELETE FROM interior_strings;
            DELETE FROM fingerprints;
            DELETE FROM dump_meta;
            "#,
        )?;

        {
            let mut meta =
                tx.prepare("INSERT INTO dump_meta (key, value) VALUES (?1, ?2)")?;
            meta.execute(params!["format_version", dump.format_version.to_string()])?;
            meta.execute(params!["created_at", dump.created_at])?;
            if let Some(source) = &dump.source {
                meta.execute(params!["source_name", source.name])?;
                if let Some(sha) = &source.sha256 {
                    meta.execute(params!["source_sha256", sha])?;
                }
            }
        }

        {
            let mut insert_fp = tx.prepare(
                r#"
                INSERT INTO fingerprints (parent_id, seq, name, start_addr, end_addr)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            let mut insert_interior = tx.prepare(
                r#"
                INSERT INTO interior_strings (fingerprint_id, seq, text, is_unique)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            let mut insert_calling = tx.prepare(
                r#"
                INSERT INTO calling_strings (fingerprint_id, seq, text, is_unique, direction)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;

            let mut write_one = |fp: &FunctionFingerprint,
                                 parent: Option<i64>,
                                 seq: usize|
             -> StoreResult<i64> {
                insert_fp.execute(params![
                    parent,
                    seq as i64,
                    fp.name,
                    fp.range.start as i64,
                    fp.range.end as i64
                ])?;
                let id = tx.last_insert_rowid();
                for (idx, s) in fp.interior_strings.iter().enumerate() {
                    insert_interior.execute(params![id, idx as i64, s.text, s.unique])?;
                }
                for (idx, s) in fp.calling_strings.iter().enumerate() {
                    insert_calling.execute(params![
                        id,
                        idx as i64,
                        s.text,
                        s.unique,
                        s.direction.as_str()
                    ])?;
                }
                Ok(id)
            };

            for (seq, fp) in dump.fingerprints.iter().enumerate() {
                let id = write_one(fp, None, seq)?;
                for (child_seq, callee) in fp.fallback_callees.iter().enumerate() {
                    write_one(callee, Some(id), child_seq)?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Load the stored dump, rejecting rows that do not hang together.
    pub fn load(&self) -> StoreResult<FingerprintDump> {
        let format_version = self
            .meta("format_version")?
            .ok_or_else(|| StoreError::Corrupt("missing format_version".into()))?
            .parse::<u32>()
            .map_err(|e| StoreError::Corrupt(format!("bad format_version: {e}")))?;
        let created_at = self
            .meta("created_at")?
            .ok_or_else(|| StoreError::Corrupt("missing created_at".into()))?;
        let source = match self.meta("source_name")? {
            Some(name) => Some(SourceImage { name, sha256: self.meta("source_sha256")? }),
            None => None,
        };

        let mut interior = self.load_interior()?;
        let mut calling = self.load_calling()?;

        let rows = {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT id, parent_id, name, start_addr, end_addr
                FROM fingerprints
                ORDER BY parent_id IS NOT NULL, parent_id, seq
                "#,
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(FingerprintRow {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                    name: row.get(2)?,
                    start: row.get::<_, i64>(3)? as u64,
                    end: row.get::<_, i64>(4)? as u64,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        let mut fingerprints: Vec<FunctionFingerprint> = Vec::new();
        let mut top_level: HashMap<i64, usize> = HashMap::new();
        for row in rows {
            let mut fp = FunctionFingerprint::new(row.name, AddressRange::new(row.start, row.end));
            fp.interior_strings = interior.remove(&row.id).unwrap_or_default();
            fp.calling_strings = calling.remove(&row.id).unwrap_or_default();
            match row.parent_id {
                None => {
                    top_level.insert(row.id, fingerprints.len());
                    fingerprints.push(fp);
                }
                Some(parent) => {
                    let idx = top_level.get(&parent).copied().ok_or_else(|| {
                        StoreError::Corrupt(format!(
                            "callee '{}' references missing or nested parent {parent}",
                            fp.name
                        ))
                    })?;
                    fingerprints[idx].fallback_callees.push(fp);
                }
            }
        }

        if let Some(id) = interior.keys().chain(calling.keys()).next() {
            return Err(StoreError::Corrupt(format!("strings reference missing fingerprint {id}")));
        }

        Ok(FingerprintDump { format_version, created_at, source, fingerprints })
    }

    fn meta(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM dump_meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn load_interior(&self) -> StoreResult<HashMap<i64, Vec<InteriorString>>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT fingerprint_id, text, is_unique
            FROM interior_strings
            ORDER BY fingerprint_id, seq
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, InteriorString { text: row.get(1)?, unique: row.get(2)? }))
        })?;
        let mut out: HashMap<i64, Vec<InteriorString>> = HashMap::new();
        for row in rows {
            let (id, s) = row?;
            out.entry(id).or_default().push(s);
        }
        Ok(out)
    }

    fn load_calling(&self) -> StoreResult<HashMap<i64, Vec<CallingString>>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT fingerprint_id, text, is_unique, direction
            FROM calling_strings
            ORDER BY fingerprint_id, seq
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out: HashMap<i64, Vec<CallingString>> = HashMap::new();
        for row in rows {
            let (id, text, unique, direction) = row?;
            let direction = direction.parse::<Direction>().map_err(StoreError::Corrupt)?;
            out.entry(id).or_default().push(CallingString { text, unique, direction });
        }
        Ok(out)
    }
}

/// Apply schema migrations to bring the database to the latest version.
///
/// We use `PRAGMA user_version` as the schema version indicator.
///
/// Version map:
/// - 0: no schema
/// - 1: dump_meta, fingerprints (with parent_id for callees), interior/calling strings
fn apply_migrations(conn: &Connection) -> StoreResult<()> {
    let current_version = current_schema_version(conn)?;

    // Reject DBs created with a newer schema than we support.
    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS dump_meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS fingerprints (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id  INTEGER,
                seq        INTEGER NOT NULL,
                name       TEXT NOT NULL,
                start_addr INTEGER NOT NULL,
                end_addr   INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS interior_strings (
                fingerprint_id INTEGER NOT NULL,
                seq            INTEGER NOT NULL,
                text           TEXT NOT NULL,
                is_unique      INTEGER NOT NULL,
                PRIMARY KEY(fingerprint_id, seq)
            );

            CREATE TABLE IF NOT EXISTS calling_strings (
                fingerprint_id INTEGER NOT NULL,
                seq            INTEGER NOT NULL,
                text           TEXT NOT NULL,
                is_unique      INTEGER NOT NULL,
                direction      TEXT NOT NULL,
                PRIMARY KEY(fingerprint_id, seq)
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

/// Read the SQLite schema version from `PRAGMA user_version`.
fn current_schema_version(conn: &Connection) -> StoreResult<u32> {
    let version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version.max(0) as u32)
}
