//! Derives installed-title records from butler cave verdicts.
//!
//! Only the first candidate of a verdict is ever considered. Multi-candidate
//! verdicts (per-architecture builds, launchers next to the game binary) are
//! not disambiguated: if the first candidate is missing on disk the title is
//! reported as not installed even when a later candidate exists.

use itch_bridge_protocol::LocalGameState;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ItchError, Result};
use crate::types::{InstalledEntry, RawInstallationRow};

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(rename = "basePath")]
    base_path: String,
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    path: String,
}

/// Resolves the executable named by a verdict payload.
///
/// Returns `Ok(None)` when the verdict has no candidates.
pub fn executable_from_verdict(game_id: i64, verdict_json: &str) -> Result<Option<PathBuf>> {
    let verdict: Verdict = serde_json::from_str(verdict_json)
        .map_err(|err| ItchError::malformed(game_id, format!("invalid verdict JSON: {}", err)))?;

    let first = match verdict.candidates.as_deref() {
        Some([first, ..]) => first,
        _ => return Ok(None),
    };

    Ok(Some(Path::new(&verdict.base_path).join(&first.path)))
}

/// Resolves one row to an installed entry.
///
/// `Ok(None)` means "not installed": no candidates, or the first candidate is
/// missing on disk.
pub fn resolve_row(
    row: &RawInstallationRow,
    file_exists: &dyn Fn(&Path) -> bool,
) -> Result<Option<InstalledEntry>> {
    let verdict_json = row
        .verdict_json
        .as_deref()
        .ok_or_else(|| ItchError::malformed(row.game_id, "missing verdict"))?;

    let Some(executable) = executable_from_verdict(row.game_id, verdict_json)? else {
        debug!(game_id = row.game_id, "Verdict has no candidates");
        return Ok(None);
    };

    if !file_exists(&executable) {
        let err = ItchError::ExecutableNotFound(executable);
        debug!(game_id = row.game_id, reason = %err, "Treating game as not installed");
        return Ok(None);
    }

    Ok(Some(InstalledEntry {
        id: row.game_id.to_string(),
        executable,
        state: LocalGameState::Installed,
    }))
}

/// Resolves every row, skipping malformed verdicts and continuing the batch.
pub fn resolve(
    rows: &[RawInstallationRow],
    file_exists: &dyn Fn(&Path) -> bool,
) -> BTreeMap<String, InstalledEntry> {
    let mut entries = BTreeMap::new();

    for row in rows {
        match resolve_row(row, file_exists) {
            Ok(Some(entry)) => {
                debug!(
                    game_id = %entry.id,
                    executable = %entry.executable.display(),
                    "Resolved installed game"
                );
                entries.insert(entry.id.clone(), entry);
            }
            Ok(None) => {}
            Err(err) => {
                warn!(game_id = row.game_id, error = %err, "Skipping installation row");
            }
        }
    }

    entries
}
