//! Cross-boundary contracts shared by the core engine, storage, and API.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const GRID_ROWS: usize = 4;
pub const GRID_COLS: usize = 5;
pub const MAX_MEMBERS: usize = 4;
pub const GROUP_CODE_LEN: usize = 6;

/// A grid coordinate as it travels on the wire: `[row, col]`.
pub type TileCoord = [usize; 2];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BuildingKind {
    House,
    Apartment,
    Skyscraper,
}

impl BuildingKind {
    pub const ALL: [BuildingKind; 3] = [
        BuildingKind::House,
        BuildingKind::Apartment,
        BuildingKind::Skyscraper,
    ];

    /// Days of group-wide goal completion required to finish this building.
    pub fn days_required(self) -> u32 {
        match self {
            Self::House => 1,
            Self::Apartment => 3,
            Self::Skyscraper => 7,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "house" => Some(Self::House),
            "apartment" => Some(Self::Apartment),
            "skyscraper" => Some(Self::Skyscraper),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::House => "house",
            Self::Apartment => "apartment",
            Self::Skyscraper => "skyscraper",
        }
    }

    pub fn tile(self) -> Tile {
        match self {
            Self::House => Tile::House,
            Self::Apartment => Tile::Apartment,
            Self::Skyscraper => Tile::Skyscraper,
        }
    }
}

impl fmt::Display for BuildingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a non-empty grid cell holds. Empty cells are `None` on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tile {
    Rubble,
    House,
    Apartment,
    Skyscraper,
}

impl Tile {
    /// The building standing on this tile, if any. Rubble is not a building.
    pub fn building(self) -> Option<BuildingKind> {
        match self {
            Self::Rubble => None,
            Self::House => Some(BuildingKind::House),
            Self::Apartment => Some(BuildingKind::Apartment),
            Self::Skyscraper => Some(BuildingKind::Skyscraper),
        }
    }
}

/// The shared city: a fixed 4x5 matrix of cells, row-major.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CityGrid(pub [[Option<Tile>; GRID_COLS]; GRID_ROWS]);

impl Default for CityGrid {
    fn default() -> Self {
        Self([[None; GRID_COLS]; GRID_ROWS])
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveBuild {
    #[serde(rename = "type")]
    pub kind: BuildingKind,
    pub days_required: u32,
    pub days_completed: u32,
}

impl ActiveBuild {
    pub fn new(kind: BuildingKind) -> Self {
        Self {
            kind,
            days_required: kind.days_required(),
            days_completed: 0,
        }
    }
}

/// The most recent resolution outcome, overwritten (never appended) each time
/// a resolution produces one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingEvent {
    BuildComplete {
        event_id: String,
        building: BuildingKind,
        tile: TileCoord,
        timestamp: String,
    },
    Asteroid {
        event_id: String,
        tiles_destroyed: Vec<TileCoord>,
        timestamp: String,
    },
}

/// The aggregate root. One record per group; the build, grid, and pending
/// event are embedded values with no identity of their own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub group_id: String,
    pub group_code: String,
    pub group_name: String,
    pub group_members: Vec<String>,
    pub daily_goal: String,
    pub goal_reset_time: String,
    pub completions_today: Vec<String>,
    pub streak: u32,
    pub current_build: Option<ActiveBuild>,
    pub city_map: CityGrid,
    pub last_processed_date: Option<String>,
    pub pending_event: Option<PendingEvent>,
    pub created_at: String,
}

/// A partial-field update against a group record. `None` leaves the field
/// alone; the double-`Option` on `current_build` distinguishes "untouched"
/// from "cleared".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupPatch {
    pub group_members: Option<Vec<String>>,
    pub completions_today: Option<Vec<String>>,
    pub streak: Option<u32>,
    pub current_build: Option<Option<ActiveBuild>>,
    pub city_map: Option<CityGrid>,
    pub pending_event: Option<PendingEvent>,
    pub last_processed_date: Option<String>,
}

impl Group {
    /// Apply a partial update, consuming the record and returning the merged one.
    pub fn merged(mut self, patch: GroupPatch) -> Group {
        if let Some(members) = patch.group_members {
            self.group_members = members;
        }
        if let Some(completions) = patch.completions_today {
            self.completions_today = completions;
        }
        if let Some(streak) = patch.streak {
            self.streak = streak;
        }
        if let Some(build) = patch.current_build {
            self.current_build = build;
        }
        if let Some(city_map) = patch.city_map {
            self.city_map = city_map;
        }
        if let Some(event) = patch.pending_event {
            self.pending_event = Some(event);
        }
        if let Some(date) = patch.last_processed_date {
            self.last_processed_date = Some(date);
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupRequest {
    pub group_name: String,
    pub member: String,
    pub daily_goal: String,
    #[serde(default = "default_reset_time")]
    pub goal_reset_time: String,
}

fn default_reset_time() -> String {
    "00:00".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinGroupRequest {
    pub group_code: String,
    pub member: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteGoalRequest {
    pub member: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectBuildRequest {
    pub member: String,
    #[serde(rename = "type")]
    pub build_type: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FillCityRequest {
    pub count: Option<usize>,
}

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    GroupNotFound,
    GroupFull,
    NotAMember,
    InvalidBuilding,
    BuildInProgress,
    CityFull,
    NoBuildings,
    InvalidResetTime,
    InvalidRequest,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            details,
        }
    }
}
