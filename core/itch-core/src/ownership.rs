//! Derives licensed catalog entries from raw ownership rows.

use itch_bridge_protocol::LicenseType;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::{ItchError, Result};
use crate::types::{CatalogEntry, RawOwnershipRow};

/// Price dominates buyability: a buyable game with `min_price == 0` is free.
pub fn license_type(can_be_bought: bool, min_price: i64) -> LicenseType {
    if can_be_bought && min_price > 0 {
        LicenseType::SinglePurchase
    } else {
        LicenseType::FreeToPlay
    }
}

pub fn classify_row(row: &RawOwnershipRow) -> Result<CatalogEntry> {
    let title = row
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .ok_or_else(|| ItchError::malformed(row.id, "missing title"))?;

    Ok(CatalogEntry {
        id: row.id.to_string(),
        title: title.to_string(),
        license_type: license_type(row.can_be_bought, row.min_price),
    })
}

/// Classifies every row, skipping malformed ones. Duplicate ids collapse to
/// the last row seen.
pub fn classify(rows: &[RawOwnershipRow]) -> BTreeMap<String, CatalogEntry> {
    let mut entries = BTreeMap::new();

    for row in rows {
        match classify_row(row) {
            Ok(entry) => {
                debug!(
                    game_id = %entry.id,
                    title = %entry.title,
                    license = ?entry.license_type,
                    "Classified owned game"
                );
                entries.insert(entry.id.clone(), entry);
            }
            Err(err) => {
                warn!(game_id = row.id, error = %err, "Skipping ownership row");
            }
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, title: Option<&str>, min_price: i64, can_be_bought: bool) -> RawOwnershipRow {
        RawOwnershipRow {
            id,
            title: title.map(str::to_string),
            min_price,
            can_be_bought,
        }
    }

    #[test]
    fn buyable_and_priced_is_single_purchase() {
        assert_eq!(license_type(true, 499), LicenseType::SinglePurchase);
    }

    #[test]
    fn price_overrides_buyability() {
        assert_eq!(license_type(true, 0), LicenseType::FreeToPlay);
        assert_eq!(license_type(false, 0), LicenseType::FreeToPlay);
        assert_eq!(license_type(false, 1000), LicenseType::FreeToPlay);
    }

    #[test]
    fn classify_skips_rows_without_title() {
        let rows = vec![
            row(1, Some("Celeste Classic"), 0, false),
            row(2, None, 500, true),
            row(3, Some("   "), 0, false),
            row(4, Some("Paid"), 500, true),
        ];

        let entries = classify(&rows);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["1"].license_type, LicenseType::FreeToPlay);
        assert_eq!(entries["4"].license_type, LicenseType::SinglePurchase);
        assert!(!entries.contains_key("2"));
    }

    #[test]
    fn classify_row_reports_malformed_record() {
        let err = classify_row(&row(9, None, 0, false)).unwrap_err();
        match err {
            ItchError::MalformedRecord { game_id, .. } => assert_eq!(game_id, "9"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_ids_yield_one_entry() {
        let rows = vec![row(5, Some("Twice"), 0, true), row(5, Some("Twice"), 0, true)];
        let entries = classify(&rows);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries["5"].title, "Twice");
    }

    #[test]
    fn entry_converts_to_wire_game_without_dlcs() {
        let entry = classify_row(&row(3, Some("Game"), 0, false)).expect("entry");
        let game = entry.to_game();
        assert_eq!(game.game_id, "3");
        assert_eq!(game.dlcs, None);
    }
}
