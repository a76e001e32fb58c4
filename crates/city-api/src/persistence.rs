use std::fmt;
use std::path::Path;

use contracts::{ActiveBuild, CityGrid, Group, GroupPatch, PendingEvent};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug)]
pub enum PersistenceError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    CodeCollision,
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "sqlite error: {err}"),
            Self::Serde(err) => write!(f, "serde error: {err}"),
            Self::CodeCollision => write!(f, "group code already in use"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<rusqlite::Error> for PersistenceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

const GROUP_COLUMNS: &str = "group_id, group_code, group_name, group_members, daily_goal, \
     goal_reset_time, completions_today, streak, current_build, city_map, \
     last_processed_date, pending_event, created_at";

/// Single-connection SQLite store for group records. The nested build, grid,
/// and event values live in JSON text columns.
#[derive(Debug)]
pub struct SqliteGroupStore {
    conn: Connection,
}

impl SqliteGroupStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    /// Insert a freshly created group. A UNIQUE violation (colliding code or
    /// id) surfaces as `CodeCollision` so the caller can retry with new ones.
    pub fn insert_group(&mut self, group: &Group) -> Result<(), PersistenceError> {
        let members_json = serde_json::to_string(&group.group_members)?;
        let completions_json = serde_json::to_string(&group.completions_today)?;
        let build_json = encode_optional(group.current_build.as_ref())?;
        let city_json = serde_json::to_string(&group.city_map)?;
        let event_json = encode_optional(group.pending_event.as_ref())?;

        let inserted = self.conn.execute(
            "INSERT INTO groups (
                group_id,
                group_code,
                group_name,
                group_members,
                daily_goal,
                goal_reset_time,
                completions_today,
                streak,
                current_build,
                city_map,
                last_processed_date,
                pending_event,
                created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                group.group_id.as_str(),
                group.group_code.as_str(),
                group.group_name.as_str(),
                members_json,
                group.daily_goal.as_str(),
                group.goal_reset_time.as_str(),
                completions_json,
                i64::from(group.streak),
                build_json,
                city_json,
                group.last_processed_date.as_deref(),
                event_json,
                group.created_at.as_str(),
            ],
        );

        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(PersistenceError::CodeCollision)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn get_group(&self, group_id: &str) -> Result<Option<Group>, PersistenceError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE group_id = ?1"),
                params![group_id],
                read_row,
            )
            .optional()?;

        raw.map(decode_group).transpose()
    }

    /// Code lookup is case-insensitive: codes are stored uppercase.
    pub fn get_group_by_code(&self, group_code: &str) -> Result<Option<Group>, PersistenceError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE group_code = ?1"),
                params![group_code.to_uppercase()],
                read_row,
            )
            .optional()?;

        raw.map(decode_group).transpose()
    }

    /// Partial-field merge in a single UPDATE; returns the post-update record,
    /// or `None` when the group does not exist.
    pub fn update_group(
        &mut self,
        group_id: &str,
        patch: &GroupPatch,
    ) -> Result<Option<Group>, PersistenceError> {
        let Some(current) = self.get_group(group_id)? else {
            return Ok(None);
        };
        let merged = current.merged(patch.clone());
        self.write_group(&merged, None)?;
        Ok(Some(merged))
    }

    /// Like `update_group`, but the write only lands while
    /// `last_processed_date` still equals `expected_last_processed`. `None`
    /// means either the group is gone or another writer advanced the period
    /// marker first.
    pub fn update_group_guarded(
        &mut self,
        group_id: &str,
        expected_last_processed: Option<&str>,
        patch: &GroupPatch,
    ) -> Result<Option<Group>, PersistenceError> {
        let Some(current) = self.get_group(group_id)? else {
            return Ok(None);
        };
        let merged = current.merged(patch.clone());
        if self.write_group(&merged, Some(expected_last_processed))? {
            Ok(Some(merged))
        } else {
            Ok(None)
        }
    }

    pub fn delete_group(&mut self, group_id: &str) -> Result<bool, PersistenceError> {
        let deleted = self
            .conn
            .execute("DELETE FROM groups WHERE group_id = ?1", params![group_id])?;
        Ok(deleted > 0)
    }

    /// Write the mutable fields of a merged record back. `guard` of
    /// `Some(marker)` makes the write conditional on the stored
    /// `last_processed_date` (the `IS` comparison also matches the
    /// never-processed NULL case). Returns whether a row changed.
    fn write_group(
        &mut self,
        group: &Group,
        guard: Option<Option<&str>>,
    ) -> Result<bool, PersistenceError> {
        let members_json = serde_json::to_string(&group.group_members)?;
        let completions_json = serde_json::to_string(&group.completions_today)?;
        let build_json = encode_optional(group.current_build.as_ref())?;
        let city_json = serde_json::to_string(&group.city_map)?;
        let event_json = encode_optional(group.pending_event.as_ref())?;

        let changed = match guard {
            Some(expected_last_processed) => self.conn.execute(
                "UPDATE groups SET
                    group_members = ?1,
                    completions_today = ?2,
                    streak = ?3,
                    current_build = ?4,
                    city_map = ?5,
                    last_processed_date = ?6,
                    pending_event = ?7
                 WHERE group_id = ?8 AND last_processed_date IS ?9",
                params![
                    members_json,
                    completions_json,
                    i64::from(group.streak),
                    build_json,
                    city_json,
                    group.last_processed_date.as_deref(),
                    event_json,
                    group.group_id.as_str(),
                    expected_last_processed,
                ],
            )?,
            None => self.conn.execute(
                "UPDATE groups SET
                    group_members = ?1,
                    completions_today = ?2,
                    streak = ?3,
                    current_build = ?4,
                    city_map = ?5,
                    last_processed_date = ?6,
                    pending_event = ?7
                 WHERE group_id = ?8",
                params![
                    members_json,
                    completions_json,
                    i64::from(group.streak),
                    build_json,
                    city_json,
                    group.last_processed_date.as_deref(),
                    event_json,
                    group.group_id.as_str(),
                ],
            )?,
        };

        Ok(changed > 0)
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS groups (
                group_id TEXT PRIMARY KEY,
                group_code TEXT UNIQUE NOT NULL,
                group_name TEXT NOT NULL,
                group_members TEXT NOT NULL,
                daily_goal TEXT NOT NULL,
                goal_reset_time TEXT NOT NULL DEFAULT '00:00',
                completions_today TEXT NOT NULL DEFAULT '[]',
                streak INTEGER NOT NULL DEFAULT 0,
                current_build TEXT,
                city_map TEXT NOT NULL,
                last_processed_date TEXT,
                pending_event TEXT,
                created_at TEXT NOT NULL
            );
            ",
        )?;

        Ok(())
    }
}

struct RawGroupRow {
    group_id: String,
    group_code: String,
    group_name: String,
    members_json: String,
    daily_goal: String,
    goal_reset_time: String,
    completions_json: String,
    streak: i64,
    build_json: Option<String>,
    city_json: String,
    last_processed_date: Option<String>,
    event_json: Option<String>,
    created_at: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawGroupRow> {
    Ok(RawGroupRow {
        group_id: row.get(0)?,
        group_code: row.get(1)?,
        group_name: row.get(2)?,
        members_json: row.get(3)?,
        daily_goal: row.get(4)?,
        goal_reset_time: row.get(5)?,
        completions_json: row.get(6)?,
        streak: row.get(7)?,
        build_json: row.get(8)?,
        city_json: row.get(9)?,
        last_processed_date: row.get(10)?,
        event_json: row.get(11)?,
        created_at: row.get(12)?,
    })
}

fn decode_group(raw: RawGroupRow) -> Result<Group, PersistenceError> {
    let current_build = raw
        .build_json
        .as_deref()
        .map(serde_json::from_str::<ActiveBuild>)
        .transpose()?;
    let pending_event = raw
        .event_json
        .as_deref()
        .map(serde_json::from_str::<PendingEvent>)
        .transpose()?;

    Ok(Group {
        group_id: raw.group_id,
        group_code: raw.group_code,
        group_name: raw.group_name,
        group_members: serde_json::from_str(&raw.members_json)?,
        daily_goal: raw.daily_goal,
        goal_reset_time: raw.goal_reset_time,
        completions_today: serde_json::from_str(&raw.completions_json)?,
        streak: u32::try_from(raw.streak).unwrap_or(0),
        current_build,
        city_map: serde_json::from_str::<CityGrid>(&raw.city_json)?,
        last_processed_date: raw.last_processed_date,
        pending_event,
        created_at: raw.created_at,
    })
}

fn encode_optional<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>, PersistenceError> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BuildingKind, Tile};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("city_store_{name}_{nanos}.sqlite"))
    }

    fn cleanup(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));
    }

    fn sample_group(id: &str, code: &str) -> Group {
        let mut city_map = CityGrid::default();
        city_map.0[0][0] = Some(Tile::House);

        Group {
            group_id: id.to_string(),
            group_code: code.to_string(),
            group_name: "evening walk".to_string(),
            group_members: vec!["alice".to_string()],
            daily_goal: "walk 2km".to_string(),
            goal_reset_time: "00:00".to_string(),
            completions_today: Vec::new(),
            streak: 0,
            current_build: Some(ActiveBuild::new(BuildingKind::Apartment)),
            city_map,
            last_processed_date: None,
            pending_event: None,
            created_at: "2026-08-22T00:00:00+00:00".to_string(),
        }
    }

    #[test]
    fn insert_and_get_round_trips_nested_values() {
        let path = temp_db_path("round_trip");
        let mut store = SqliteGroupStore::open(&path).expect("open store");

        let group = sample_group("grp_01", "AAAAAA");
        store.insert_group(&group).expect("insert");

        let loaded = store
            .get_group("grp_01")
            .expect("get")
            .expect("group present");
        assert_eq!(loaded, group);

        cleanup(&path);
    }

    #[test]
    fn code_lookup_is_case_insensitive() {
        let path = temp_db_path("code_lookup");
        let mut store = SqliteGroupStore::open(&path).expect("open store");
        store
            .insert_group(&sample_group("grp_02", "AB12CD"))
            .expect("insert");

        let loaded = store.get_group_by_code("ab12cd").expect("lookup");
        assert!(loaded.is_some());
        assert!(store
            .get_group_by_code("ZZZZZZ")
            .expect("lookup")
            .is_none());

        cleanup(&path);
    }

    #[test]
    fn duplicate_code_reports_collision() {
        let path = temp_db_path("collision");
        let mut store = SqliteGroupStore::open(&path).expect("open store");
        store
            .insert_group(&sample_group("grp_03", "SAME01"))
            .expect("insert");

        let err = store
            .insert_group(&sample_group("grp_04", "SAME01"))
            .expect_err("duplicate code should fail");
        assert!(matches!(err, PersistenceError::CodeCollision));

        cleanup(&path);
    }

    #[test]
    fn update_merges_only_patched_fields() {
        let path = temp_db_path("merge");
        let mut store = SqliteGroupStore::open(&path).expect("open store");
        store
            .insert_group(&sample_group("grp_05", "CODE05"))
            .expect("insert");

        let patch = GroupPatch {
            streak: Some(3),
            completions_today: Some(vec!["alice".to_string()]),
            ..GroupPatch::default()
        };
        let updated = store
            .update_group("grp_05", &patch)
            .expect("update")
            .expect("group present");

        assert_eq!(updated.streak, 3);
        assert_eq!(updated.completions_today, vec!["alice".to_string()]);
        assert!(updated.current_build.is_some());
        assert_eq!(updated.group_name, "evening walk");

        cleanup(&path);
    }

    #[test]
    fn guarded_update_rejects_stale_period_marker() {
        let path = temp_db_path("guard");
        let mut store = SqliteGroupStore::open(&path).expect("open store");
        store
            .insert_group(&sample_group("grp_06", "CODE06"))
            .expect("insert");

        let first = GroupPatch {
            streak: Some(1),
            last_processed_date: Some("2026-08-22".to_string()),
            ..GroupPatch::default()
        };
        // Guard matches the stored NULL marker: the write lands.
        let settled = store
            .update_group_guarded("grp_06", None, &first)
            .expect("guarded update");
        assert!(settled.is_some());

        // A second writer still holding the NULL marker loses.
        let second = GroupPatch {
            streak: Some(9),
            last_processed_date: Some("2026-08-22".to_string()),
            ..GroupPatch::default()
        };
        let lost = store
            .update_group_guarded("grp_06", None, &second)
            .expect("guarded update");
        assert!(lost.is_none());

        let current = store
            .get_group("grp_06")
            .expect("get")
            .expect("group present");
        assert_eq!(current.streak, 1);

        cleanup(&path);
    }

    #[test]
    fn delete_reports_whether_a_row_existed() {
        let path = temp_db_path("delete");
        let mut store = SqliteGroupStore::open(&path).expect("open store");
        store
            .insert_group(&sample_group("grp_07", "CODE07"))
            .expect("insert");

        assert!(store.delete_group("grp_07").expect("delete"));
        assert!(!store.delete_group("grp_07").expect("delete again"));

        cleanup(&path);
    }
}
