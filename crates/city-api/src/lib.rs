//! Group lifecycle facade over the resolution engine, with lazy once-per-period
//! settlement and SQLite persistence.

mod persistence;
mod server;

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use city_core::clock::{current_period_id_at, period_is_due_at, ResetTime};
use city_core::grid::{occupied_tiles, open_tiles};
use city_core::resolve::{
    destroy_weight, next_event_id, resolve_day, weighted_sample_without_replacement,
    DESTROY_MAX_PER_EVENT,
};
use contracts::{
    ActiveBuild, BuildingKind, CityGrid, CompleteGoalRequest, CreateGroupRequest, FillCityRequest,
    Group, GroupPatch, JoinGroupRequest, PendingEvent, SelectBuildRequest, Tile, GROUP_CODE_LEN,
    MAX_MEMBERS,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use persistence::SqliteGroupStore;
pub use persistence::PersistenceError;
pub use server::{serve, serve_with_store, ServerError};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_RETRY_LIMIT: usize = 5;

#[derive(Debug)]
pub enum ServiceError {
    GroupNotFound,
    InvalidGroupCode,
    GroupFull,
    NotAMember,
    BuildInProgress,
    InvalidBuilding,
    CityFull,
    NoBuildings,
    InvalidResetTime,
    InvalidRequest(String),
    Persistence(PersistenceError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupNotFound => f.write_str("Group not found"),
            Self::InvalidGroupCode => f.write_str("Invalid group code"),
            Self::GroupFull => write!(f, "Group is full (max {MAX_MEMBERS} members)"),
            Self::NotAMember => f.write_str("Not a member of this group"),
            Self::BuildInProgress => f.write_str("A build is already in progress"),
            Self::InvalidBuilding => {
                f.write_str("Invalid building type. Choose house, apartment, or skyscraper")
            }
            Self::CityFull => f.write_str("City is full, no empty tiles"),
            Self::NoBuildings => f.write_str("Need at least 2 buildings on the map"),
            Self::InvalidResetTime => f.write_str("goal_reset_time must be HH:MM"),
            Self::InvalidRequest(message) => f.write_str(message),
            Self::Persistence(err) => write!(f, "persistence failure: {err}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<PersistenceError> for ServiceError {
    fn from(value: PersistenceError) -> Self {
        Self::Persistence(value)
    }
}

/// All group operations route through here. Every read of an existing group
/// settles it first, so callers never observe a group with an unresolved
/// period.
#[derive(Debug)]
pub struct GroupService<R: Rng = StdRng> {
    store: SqliteGroupStore,
    rng: R,
}

impl GroupService<StdRng> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        Self::with_rng(path, StdRng::from_entropy())
    }
}

impl<R: Rng> GroupService<R> {
    pub fn with_rng(path: impl AsRef<Path>, rng: R) -> Result<Self, ServiceError> {
        Ok(Self {
            store: SqliteGroupStore::open(path)?,
            rng,
        })
    }

    pub fn create_group(&mut self, request: CreateGroupRequest) -> Result<Group, ServiceError> {
        let group_name = required_field(&request.group_name, "group_name")?;
        let member = required_field(&request.member, "member")?;
        let daily_goal = required_field(&request.daily_goal, "daily_goal")?;
        let Some(reset) = ResetTime::parse(&request.goal_reset_time) else {
            return Err(ServiceError::InvalidResetTime);
        };

        let now = Utc::now();

        // Freshly created groups start with the current period already marked
        // processed, so the first read does not trigger a resolution.
        for _ in 0..=CODE_RETRY_LIMIT {
            let group = Group {
                group_id: self.next_group_id(),
                group_code: self.next_group_code(),
                group_name: group_name.clone(),
                group_members: vec![member.clone()],
                daily_goal: daily_goal.clone(),
                goal_reset_time: reset.to_string(),
                completions_today: Vec::new(),
                streak: 0,
                current_build: None,
                city_map: CityGrid::default(),
                last_processed_date: Some(current_period_id_at(now, reset)),
                pending_event: None,
                created_at: now.to_rfc3339(),
            };

            match self.store.insert_group(&group) {
                Ok(()) => return Ok(group),
                Err(PersistenceError::CodeCollision) => continue,
                Err(other) => return Err(other.into()),
            }
        }

        Err(ServiceError::Persistence(PersistenceError::CodeCollision))
    }

    pub fn get_group(&mut self, group_id: &str) -> Result<Group, ServiceError> {
        let group = self.require_group(group_id)?;
        self.settle(group)
    }

    /// Idempotent: joining a group you already belong to returns it unchanged.
    pub fn join_group(&mut self, request: JoinGroupRequest) -> Result<Group, ServiceError> {
        let member = required_field(&request.member, "member")?;
        let group = self
            .store
            .get_group_by_code(&request.group_code)?
            .ok_or(ServiceError::InvalidGroupCode)?;
        let group = self.settle(group)?;

        if group.group_members.contains(&member) {
            return Ok(group);
        }
        if group.group_members.len() >= MAX_MEMBERS {
            return Err(ServiceError::GroupFull);
        }

        let mut members = group.group_members.clone();
        members.push(member);
        let patch = GroupPatch {
            group_members: Some(members),
            ..GroupPatch::default()
        };
        self.apply(&group.group_id, &patch)
    }

    /// Idempotent: a member who already completed today's goal is not recorded
    /// twice.
    pub fn complete_goal(
        &mut self,
        group_id: &str,
        request: CompleteGoalRequest,
    ) -> Result<Group, ServiceError> {
        let member = required_field(&request.member, "member")?;
        let group = self.require_group(group_id)?;
        let group = self.settle(group)?;

        if !group.group_members.contains(&member) {
            return Err(ServiceError::NotAMember);
        }
        if group.completions_today.contains(&member) {
            return Ok(group);
        }

        let mut completions = group.completions_today.clone();
        completions.push(member);
        let patch = GroupPatch {
            completions_today: Some(completions),
            ..GroupPatch::default()
        };
        self.apply(&group.group_id, &patch)
    }

    pub fn select_build(
        &mut self,
        group_id: &str,
        request: SelectBuildRequest,
    ) -> Result<Group, ServiceError> {
        let member = required_field(&request.member, "member")?;
        let Some(kind) = BuildingKind::parse(request.build_type.trim()) else {
            return Err(ServiceError::InvalidBuilding);
        };

        let group = self.require_group(group_id)?;
        let group = self.settle(group)?;

        if !group.group_members.contains(&member) {
            return Err(ServiceError::NotAMember);
        }
        if group.current_build.is_some() {
            return Err(ServiceError::BuildInProgress);
        }
        // No point starting a build the city cannot hold.
        if open_tiles(&group.city_map).is_empty() {
            return Err(ServiceError::CityFull);
        }

        let patch = GroupPatch {
            current_build: Some(Some(ActiveBuild::new(kind))),
            ..GroupPatch::default()
        };
        self.apply(&group.group_id, &patch)
    }

    pub fn delete_group(&mut self, group_id: &str) -> Result<(), ServiceError> {
        if self.store.delete_group(group_id)? {
            Ok(())
        } else {
            Err(ServiceError::GroupNotFound)
        }
    }

    /// Demo hook: strike the city right now, regardless of goal state. The
    /// active build, streak, and completion set are left untouched.
    pub fn force_asteroid(&mut self, group_id: &str) -> Result<Group, ServiceError> {
        let group = self.require_group(group_id)?;
        let group = self.settle(group)?;

        let occupied = occupied_tiles(&group.city_map);
        if occupied.len() < 2 {
            return Err(ServiceError::NoBuildings);
        }

        let max_destroy = DESTROY_MAX_PER_EVENT.min(occupied.len() - 1);
        let n_destroy = self.rng.gen_range(1..=max_destroy);
        let weights: Vec<u32> = occupied
            .iter()
            .map(|&(_, _, kind)| destroy_weight(kind))
            .collect();
        let chosen = weighted_sample_without_replacement(&weights, n_destroy, &mut self.rng);

        let mut new_map = group.city_map;
        let mut tiles_destroyed = Vec::with_capacity(chosen.len());
        for index in chosen {
            let (row, col, _) = occupied[index];
            new_map.0[row][col] = Some(Tile::Rubble);
            tiles_destroyed.push([row, col]);
        }

        let patch = GroupPatch {
            city_map: Some(new_map),
            pending_event: Some(PendingEvent::Asteroid {
                event_id: next_event_id(&mut self.rng),
                tiles_destroyed,
                timestamp: Utc::now().to_rfc3339(),
            }),
            ..GroupPatch::default()
        };
        self.apply(&group.group_id, &patch)
    }

    /// Demo hook: drop random buildings on up to `count` open tiles (all of
    /// them when `count` is absent).
    pub fn fill_city(
        &mut self,
        group_id: &str,
        request: FillCityRequest,
    ) -> Result<Group, ServiceError> {
        let group = self.require_group(group_id)?;
        let group = self.settle(group)?;

        let mut open = open_tiles(&group.city_map);
        if open.is_empty() {
            return Err(ServiceError::CityFull);
        }

        let count = request.count.unwrap_or(open.len()).min(open.len());
        if count == 0 {
            return Ok(group);
        }

        let mut new_map = group.city_map;
        for _ in 0..count {
            let tile = open.swap_remove(self.rng.gen_range(0..open.len()));
            let kind = BuildingKind::ALL[self.rng.gen_range(0..BuildingKind::ALL.len())];
            new_map.0[tile[0]][tile[1]] = Some(kind.tile());
        }

        let patch = GroupPatch {
            city_map: Some(new_map),
            ..GroupPatch::default()
        };
        self.apply(&group.group_id, &patch)
    }

    /// Run the at-most-once-per-period resolution if it is due, returning the
    /// settled record. The write is guarded on the period marker the group was
    /// read with; losing that race means another caller settled the same
    /// period first, and their result is re-read and returned.
    fn settle(&mut self, group: Group) -> Result<Group, ServiceError> {
        self.settle_at(group, Utc::now())
    }

    fn settle_at(&mut self, group: Group, now: DateTime<Utc>) -> Result<Group, ServiceError> {
        // A stored reset time that no longer parses falls back to midnight
        // rather than wedging the group.
        let reset = ResetTime::parse(&group.goal_reset_time).unwrap_or_default();
        if !period_is_due_at(now, reset, group.last_processed_date.as_deref()) {
            return Ok(group);
        }

        let mut patch = resolve_day(
            &group.group_members,
            &group.completions_today,
            group.current_build.as_ref(),
            &group.city_map,
            group.streak,
            now,
            &mut self.rng,
        );
        patch.last_processed_date = Some(current_period_id_at(now, reset));

        let settled = self.store.update_group_guarded(
            &group.group_id,
            group.last_processed_date.as_deref(),
            &patch,
        )?;
        match settled {
            Some(updated) => Ok(updated),
            None => self
                .store
                .get_group(&group.group_id)?
                .ok_or(ServiceError::GroupNotFound),
        }
    }

    fn require_group(&self, group_id: &str) -> Result<Group, ServiceError> {
        self.store
            .get_group(group_id)?
            .ok_or(ServiceError::GroupNotFound)
    }

    fn apply(&mut self, group_id: &str, patch: &GroupPatch) -> Result<Group, ServiceError> {
        self.store
            .update_group(group_id, patch)?
            .ok_or(ServiceError::GroupNotFound)
    }

    fn next_group_id(&mut self) -> String {
        format!("grp_{:016x}", self.rng.gen::<u64>())
    }

    fn next_group_code(&mut self) -> String {
        (0..GROUP_CODE_LEN)
            .map(|_| CODE_ALPHABET[self.rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    }
}

fn required_field(value: &str, name: &str) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ServiceError::InvalidRequest(format!(
            "{name} must not be empty"
        )))
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::SmallRng;

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("city_service_{name}_{nanos}.sqlite"))
    }

    fn cleanup(path: &std::path::Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(path.with_extension("sqlite-shm"));
    }

    fn service(path: &std::path::Path, seed: u64) -> GroupService<SmallRng> {
        GroupService::with_rng(path, SmallRng::seed_from_u64(seed)).expect("open service")
    }

    fn create_request(member: &str) -> CreateGroupRequest {
        CreateGroupRequest {
            group_name: "morning run".to_string(),
            member: member.to_string(),
            daily_goal: "run 5k".to_string(),
            goal_reset_time: "00:00".to_string(),
        }
    }

    #[test]
    fn create_join_and_complete_flow() {
        let path = temp_db_path("flow");
        let mut svc = service(&path, 1);

        let group = svc.create_group(create_request("alice")).expect("create");
        assert_eq!(group.group_code.len(), GROUP_CODE_LEN);
        assert!(group
            .group_code
            .bytes()
            .all(|byte| CODE_ALPHABET.contains(&byte)));
        assert!(group.last_processed_date.is_some());

        let joined = svc
            .join_group(JoinGroupRequest {
                group_code: group.group_code.to_lowercase(),
                member: "bob".to_string(),
            })
            .expect("join");
        assert_eq!(joined.group_members, vec!["alice", "bob"]);

        let completed = svc
            .complete_goal(
                &group.group_id,
                CompleteGoalRequest {
                    member: "bob".to_string(),
                },
            )
            .expect("complete");
        assert_eq!(completed.completions_today, vec!["bob"]);

        // Completing twice records the member once.
        let again = svc
            .complete_goal(
                &group.group_id,
                CompleteGoalRequest {
                    member: "bob".to_string(),
                },
            )
            .expect("complete again");
        assert_eq!(again.completions_today, vec!["bob"]);

        cleanup(&path);
    }

    #[test]
    fn join_rejects_fifth_member_but_not_rejoin() {
        let path = temp_db_path("full");
        let mut svc = service(&path, 2);

        let group = svc.create_group(create_request("alice")).expect("create");
        for member in ["bob", "cara", "dan"] {
            svc.join_group(JoinGroupRequest {
                group_code: group.group_code.clone(),
                member: member.to_string(),
            })
            .expect("join");
        }

        let rejected = svc.join_group(JoinGroupRequest {
            group_code: group.group_code.clone(),
            member: "eve".to_string(),
        });
        assert!(matches!(rejected, Err(ServiceError::GroupFull)));

        let rejoined = svc
            .join_group(JoinGroupRequest {
                group_code: group.group_code.clone(),
                member: "cara".to_string(),
            })
            .expect("rejoin");
        assert_eq!(rejoined.group_members.len(), 4);

        cleanup(&path);
    }

    #[test]
    fn join_with_unknown_code_fails() {
        let path = temp_db_path("bad_code");
        let mut svc = service(&path, 3);
        svc.create_group(create_request("alice")).expect("create");

        let result = svc.join_group(JoinGroupRequest {
            group_code: "NOPE00".to_string(),
            member: "bob".to_string(),
        });
        assert!(matches!(result, Err(ServiceError::InvalidGroupCode)));

        cleanup(&path);
    }

    #[test]
    fn select_build_validates_membership_kind_and_exclusivity() {
        let path = temp_db_path("build");
        let mut svc = service(&path, 4);
        let group = svc.create_group(create_request("alice")).expect("create");

        let bad_kind = svc.select_build(
            &group.group_id,
            SelectBuildRequest {
                member: "alice".to_string(),
                build_type: "castle".to_string(),
            },
        );
        assert!(matches!(bad_kind, Err(ServiceError::InvalidBuilding)));

        let outsider = svc.select_build(
            &group.group_id,
            SelectBuildRequest {
                member: "mallory".to_string(),
                build_type: "house".to_string(),
            },
        );
        assert!(matches!(outsider, Err(ServiceError::NotAMember)));

        let started = svc
            .select_build(
                &group.group_id,
                SelectBuildRequest {
                    member: "alice".to_string(),
                    build_type: "skyscraper".to_string(),
                },
            )
            .expect("select");
        let build = started.current_build.expect("build active");
        assert_eq!(build.kind, BuildingKind::Skyscraper);
        assert_eq!(build.days_required, 7);

        let second = svc.select_build(
            &group.group_id,
            SelectBuildRequest {
                member: "alice".to_string(),
                build_type: "house".to_string(),
            },
        );
        assert!(matches!(second, Err(ServiceError::BuildInProgress)));

        cleanup(&path);
    }

    #[test]
    fn select_build_refused_when_city_is_full() {
        let path = temp_db_path("city_full");
        let mut svc = service(&path, 10);
        let group = svc.create_group(create_request("alice")).expect("create");
        svc.fill_city(&group.group_id, FillCityRequest::default())
            .expect("fill");

        let result = svc.select_build(
            &group.group_id,
            SelectBuildRequest {
                member: "alice".to_string(),
                build_type: "house".to_string(),
            },
        );
        assert!(matches!(result, Err(ServiceError::CityFull)));

        cleanup(&path);
    }

    #[test]
    fn create_rejects_malformed_reset_time_and_blank_member() {
        let path = temp_db_path("validate");
        let mut svc = service(&path, 5);

        let mut request = create_request("alice");
        request.goal_reset_time = "25:00".to_string();
        assert!(matches!(
            svc.create_group(request),
            Err(ServiceError::InvalidResetTime)
        ));

        let blank = svc.create_group(create_request("   "));
        assert!(matches!(blank, Err(ServiceError::InvalidRequest(_))));

        cleanup(&path);
    }

    #[test]
    fn stale_period_marker_triggers_one_settlement() {
        let path = temp_db_path("settle");
        let mut svc = service(&path, 6);
        let group = svc.create_group(create_request("alice")).expect("create");
        svc.select_build(
            &group.group_id,
            SelectBuildRequest {
                member: "alice".to_string(),
                build_type: "house".to_string(),
            },
        )
        .expect("select");
        svc.complete_goal(
            &group.group_id,
            CompleteGoalRequest {
                member: "alice".to_string(),
            },
        )
        .expect("complete");

        // Re-run the gate as if the marker were from a long-past period.
        let stored = svc.require_group(&group.group_id).expect("stored");
        let now = Utc
            .with_ymd_and_hms(2030, 1, 5, 12, 0, 0)
            .single()
            .expect("valid instant");
        let settled = svc.settle_at(stored, now).expect("settle");

        assert_eq!(settled.last_processed_date.as_deref(), Some("2030-01-05"));
        assert!(settled.completions_today.is_empty());
        assert!(settled.current_build.is_none());
        assert_eq!(occupied_tiles(&settled.city_map).len(), 1);
        assert!(matches!(
            settled.pending_event,
            Some(PendingEvent::BuildComplete { .. })
        ));

        // The same instant settles at most once.
        let again = svc.settle_at(settled.clone(), now).expect("settle again");
        assert_eq!(again, settled);

        cleanup(&path);
    }

    #[test]
    fn force_asteroid_needs_two_buildings_then_spares_one() {
        let path = temp_db_path("asteroid");
        let mut svc = service(&path, 7);
        let group = svc.create_group(create_request("alice")).expect("create");

        assert!(matches!(
            svc.force_asteroid(&group.group_id),
            Err(ServiceError::NoBuildings)
        ));

        let filled = svc
            .fill_city(&group.group_id, FillCityRequest { count: Some(4) })
            .expect("fill");
        assert_eq!(occupied_tiles(&filled.city_map).len(), 4);

        let struck = svc.force_asteroid(&group.group_id).expect("asteroid");
        let survivors = occupied_tiles(&struck.city_map);
        assert!(!survivors.is_empty());
        assert!(survivors.len() < 4);
        assert!(matches!(
            struck.pending_event,
            Some(PendingEvent::Asteroid { .. })
        ));
        // The demo strike does not touch goal state.
        assert_eq!(struck.streak, filled.streak);
        assert_eq!(struck.current_build, filled.current_build);

        cleanup(&path);
    }

    #[test]
    fn fill_city_refuses_when_no_tile_is_open() {
        let path = temp_db_path("fill_full");
        let mut svc = service(&path, 8);
        let group = svc.create_group(create_request("alice")).expect("create");

        let filled = svc
            .fill_city(&group.group_id, FillCityRequest::default())
            .expect("fill all");
        assert!(open_tiles(&filled.city_map).is_empty());

        assert!(matches!(
            svc.fill_city(&group.group_id, FillCityRequest::default()),
            Err(ServiceError::CityFull)
        ));

        cleanup(&path);
    }

    #[test]
    fn delete_then_get_reports_not_found() {
        let path = temp_db_path("delete");
        let mut svc = service(&path, 9);
        let group = svc.create_group(create_request("alice")).expect("create");

        svc.delete_group(&group.group_id).expect("delete");
        assert!(matches!(
            svc.get_group(&group.group_id),
            Err(ServiceError::GroupNotFound)
        ));
        assert!(matches!(
            svc.delete_group(&group.group_id),
            Err(ServiceError::GroupNotFound)
        ));

        cleanup(&path);
    }
}
