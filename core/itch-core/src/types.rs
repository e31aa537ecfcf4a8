//! Record types shared by the repository, classifier, resolver and engine.

use itch_bridge_protocol::{Game, LicenseType, LocalGame, LocalGameState};
use serde::Serialize;
use std::path::PathBuf;

/// One `games` row that passed the ownership predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOwnershipRow {
    pub id: i64,
    pub title: Option<String>,
    pub min_price: i64,
    pub can_be_bought: bool,
}

/// One `caves` row: the game id and its butler verdict payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstallationRow {
    pub game_id: i64,
    pub verdict_json: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    pub license_type: LicenseType,
}

impl CatalogEntry {
    pub fn to_game(&self) -> Game {
        Game {
            game_id: self.id.clone(),
            game_title: self.title.clone(),
            dlcs: None,
            license_type: self.license_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstalledEntry {
    pub id: String,
    pub executable: PathBuf,
    pub state: LocalGameState,
}

impl InstalledEntry {
    pub fn to_local_game(&self) -> LocalGame {
        LocalGame {
            game_id: self.id.clone(),
            local_game_state: self.state,
        }
    }
}

/// Canonical form of a host-supplied game id.
///
/// Butler ids are integers, so `"0012"` and `"12"` name the same title and
/// must share cache entries and playtime keys. Non-numeric ids pass through
/// trimmed.
pub fn canonical_game_id(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<i64>() {
        Ok(id) => id.to_string(),
        Err(_) => trimmed.to_string(),
    }
}
