//! IPC protocol types and validation for the itch bridge daemon.
//!
//! This crate is shared by the daemon and the host adapter so both sides agree
//! on the wire schema. The daemon remains the authority on validation, but
//! clients can reuse the same types to construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;
pub const MAX_GAME_ID_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Authenticate,
    GetOwnedGames,
    GetLocalGames,
    GetGameTime,
    LaunchGame,
    InstallGame,
    UninstallGame,
    GetOsCompatibility,
    Tick,
}

impl Method {
    /// Methods that operate on a single title and require `{"game_id": ...}`.
    pub fn requires_game_id(self) -> bool {
        matches!(
            self,
            Method::GetGameTime
                | Method::LaunchGame
                | Method::InstallGame
                | Method::UninstallGame
                | Method::GetOsCompatibility
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(method: Method) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params: None,
        }
    }

    pub fn for_game(method: Method, game_id: &str) -> Self {
        Self {
            params: Some(serde_json::json!({ "game_id": game_id })),
            ..Self::new(method)
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseType {
    FreeToPlay,
    SinglePurchase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalGameState {
    Installed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsCompatibility {
    Windows,
    MacOs,
    Linux,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub game_id: String,
    pub game_title: String,
    /// Always absent; the butler database does not model DLCs.
    pub dlcs: Option<Vec<String>>,
    pub license_type: LicenseType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalGame {
    pub game_id: String,
    pub local_game_state: LocalGameState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameTime {
    pub game_id: String,
    /// Total minutes played; `None` when the title was never launched here.
    pub time_played: Option<u64>,
    /// Epoch seconds of the end of the last session.
    pub last_played_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameParams {
    pub game_id: String,
}

impl GameParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        let trimmed = self.game_id.trim();
        if trimmed.is_empty() {
            return Err(ErrorInfo::new("missing_field", "game_id is required"));
        }
        if self.game_id.len() > MAX_GAME_ID_LEN {
            return Err(ErrorInfo::new(
                "invalid_game_id",
                format!("game_id must be {} characters or fewer", MAX_GAME_ID_LEN),
            ));
        }
        // Game ids end up in persistent-cache keys and in `itch://` URIs.
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(ErrorInfo::new(
                "invalid_game_id",
                "game_id must be alphanumeric",
            ));
        }
        Ok(())
    }
}

pub fn parse_game_params(params: Option<Value>) -> Result<GameParams, ErrorInfo> {
    let params = params.ok_or_else(|| ErrorInfo::new("invalid_params", "game_id is required"))?;
    let parsed: GameParams = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("game params are invalid JSON: {}", err),
        )
    })?;
    parsed.validate()?;
    Ok(GameParams {
        game_id: parsed.game_id.trim().to_string(),
    })
}
