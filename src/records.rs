//! # Sheet Records Module
//!
//! Row layouts for the three kinds of sheets the bot writes (tasks, trip
//! log, per-machine fuel log), the status vocabulary, and the small pieces
//! of arithmetic derived from them (trip mileage, fuel consumption).
//!
//! All row and column indices are 1-based, matching spreadsheet addressing;
//! the first row of every sheet is a header.

use chrono::{DateTime, FixedOffset, Utc};

/// Primary task status while a driver is working on it
pub const STATUS_IN_PROGRESS: &str = "in progress";
/// Primary task status once the driver reports completion
pub const STATUS_COMPLETED: &str = "completed";

/// Marker written instead of a consumption figure when the odometer delta
/// is not usable (zero, negative, or unparseable previous reading)
pub const CONSUMPTION_ERROR_MARKER: &str = "error";

/// Task sheet columns (1-based)
pub mod task_col {
    pub const DATE: usize = 1;
    pub const DRIVER: usize = 2;
    pub const MACHINE: usize = 3;
    pub const PLANNED: usize = 4;
    pub const ACCEPTED: usize = 5;
    pub const ETA: usize = 6;
    pub const STATUS: usize = 7;
    pub const COMPLETED: usize = 8;
    pub const COMMENT: usize = 9;
    /// (description, status) column pairs for the three sub-task slots
    pub const SUBTASKS: [(usize, usize); 3] = [(10, 11), (12, 13), (14, 15)];
}

/// Trip log sheet columns (1-based)
pub mod trip_col {
    pub const DATE: usize = 1;
    pub const DRIVER: usize = 2;
    pub const MACHINE: usize = 3;
    pub const START_TIME: usize = 4;
    pub const START_ODOMETER: usize = 5;
    pub const END_TIME: usize = 6;
    pub const END_ODOMETER: usize = 7;
    pub const MILEAGE: usize = 8;
    /// The machine list lives in a spare column of the trip sheet
    pub const MACHINE_LIST: usize = 10;
}

/// Fuel log sheet columns (1-based)
pub mod fuel_col {
    pub const ODOMETER: usize = 4;
}

/// Header row written when a per-machine fuel sheet is created
pub const FUEL_SHEET_HEADER: [&str; 5] = [
    "Date and time",
    "Driver",
    "Liters",
    "Odometer",
    "Consumption (L/100 km)",
];

// Header cells used to recognize the two functional sheets. Spellings from
// both observed deployments (English and Russian) are accepted.
pub const TASK_SHEET_MARKERS: [&str; 2] = ["status", "статус"];
pub const ROSTER_SHEET_MARKERS: [&str; 2] = ["chat", "чат"];

/// One row of the tasks sheet, padded so every column is addressable.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    /// 1-based sheet row index
    pub index: usize,
    pub date: String,
    pub driver: String,
    pub machine: String,
    pub planned: String,
    pub accepted: String,
    pub eta: String,
    pub status: String,
    pub completed: String,
    pub comment: String,
    /// (description, status) for the three sub-task slots
    pub subtasks: [(String, String); 3],
}

impl TaskRow {
    /// Build a task row from raw cells; short rows are padded with blanks.
    pub fn from_cells(index: usize, cells: &[String]) -> Self {
        let cell = |col: usize| {
            cells
                .get(col - 1)
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };
        Self {
            index,
            date: cell(task_col::DATE),
            driver: cell(task_col::DRIVER),
            machine: cell(task_col::MACHINE),
            planned: cell(task_col::PLANNED),
            accepted: cell(task_col::ACCEPTED),
            eta: cell(task_col::ETA),
            status: cell(task_col::STATUS),
            completed: cell(task_col::COMPLETED),
            comment: cell(task_col::COMMENT),
            subtasks: task_col::SUBTASKS.map(|(d, s)| (cell(d), cell(s))),
        }
    }

    /// A row is dispatchable when it is dated `today`, names `driver` and
    /// has an empty status (not yet taken by anyone).
    pub fn matches_waiting_driver(&self, today: &str, driver: &str) -> bool {
        self.date == today && self.driver == driver && self.status.is_empty()
    }
}

/// Trip mileage from the two odometer readings.
pub fn mileage(start_odometer: i64, end_odometer: i64) -> i64 {
    end_odometer - start_odometer
}

/// Fuel consumption derived from the previous fuel row's odometer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Consumption {
    /// Liters per 100 distance units, rounded to two decimals
    PerHundred(f64),
    /// The odometer delta was unusable
    Invalid,
}

impl Consumption {
    /// Cell representation: decimal-comma figure, or the error marker.
    pub fn to_cell(self) -> String {
        match self {
            Consumption::PerHundred(v) => format_decimal_comma(v),
            Consumption::Invalid => CONSUMPTION_ERROR_MARKER.to_string(),
        }
    }
}

/// `liters / distance * 100`, where distance is the odometer delta.
/// A non-positive distance yields [`Consumption::Invalid`].
pub fn consumption(liters: f64, previous_odometer: i64, current_odometer: i64) -> Consumption {
    let distance = current_odometer - previous_odometer;
    if distance <= 0 {
        return Consumption::Invalid;
    }
    let raw = liters / distance as f64 * 100.0;
    Consumption::PerHundred((raw * 100.0).round() / 100.0)
}

/// Render a number the way the drivers' sheets expect it: decimal comma,
/// no trailing zeros beyond what the value carries.
pub fn format_decimal_comma(value: f64) -> String {
    let formatted = if value.fract().abs() < f64::EPSILON {
        format!("{value:.1}")
    } else {
        format!("{value}")
    };
    formatted.replace('.', ",")
}

/// Append `addition` to an existing comment cell, newline-joined.
/// Existing content is never overwritten.
pub fn append_comment(existing: &str, addition: &str) -> String {
    if existing.trim().is_empty() {
        addition.to_string()
    } else {
        format!("{existing}\n{addition}")
    }
}

/// `driver (timestamp): reason` — the shape of every appended comment.
pub fn signed_comment(driver: &str, timestamp: &str, text: &str) -> String {
    format!("{driver} ({timestamp}): {text}")
}

/// `driver (timestamp)` — the sub-task acknowledgement string.
pub fn signed_ack(driver: &str, timestamp: &str) -> String {
    format!("{driver} ({timestamp})")
}

/// Current time in the bot's fixed-offset timezone.
pub fn now_local(tz: &FixedOffset) -> DateTime<FixedOffset> {
    Utc::now().with_timezone(tz)
}

pub fn date_string(now: &DateTime<FixedOffset>) -> String {
    now.format("%Y-%m-%d").to_string()
}

pub fn time_string(now: &DateTime<FixedOffset>) -> String {
    now.format("%H:%M:%S").to_string()
}

pub fn timestamp_string(now: &DateTime<FixedOffset>) -> String {
    now.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Case-insensitive check whether a header row mentions any marker.
pub fn header_matches(header: &[String], markers: &[&str]) -> bool {
    header.iter().any(|cell| {
        let cell = cell.to_lowercase();
        markers.iter().any(|m| cell.contains(m))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumption_oracle() {
        // liters=24.5, prev=1000, curr=1100 → distance=100 → 24.5 L/100
        let c = consumption(24.5, 1000, 1100);
        assert_eq!(c, Consumption::PerHundred(24.5));
        assert_eq!(c.to_cell(), "24,5");
    }

    #[test]
    fn test_consumption_rounding() {
        let c = consumption(30.0, 1000, 1450);
        assert_eq!(c, Consumption::PerHundred(6.67));
    }

    #[test]
    fn test_consumption_zero_or_negative_distance() {
        assert_eq!(consumption(24.5, 1100, 1100), Consumption::Invalid);
        assert_eq!(consumption(24.5, 1200, 1100), Consumption::Invalid);
        assert_eq!(
            consumption(24.5, 1200, 1100).to_cell(),
            CONSUMPTION_ERROR_MARKER
        );
    }

    #[test]
    fn test_mileage() {
        assert_eq!(mileage(500, 650), 150);
    }

    #[test]
    fn test_format_decimal_comma() {
        assert_eq!(format_decimal_comma(24.5), "24,5");
        assert_eq!(format_decimal_comma(7.0), "7,0");
        assert_eq!(format_decimal_comma(6.67), "6,67");
    }

    #[test]
    fn test_append_comment_joins_with_newline() {
        assert_eq!(append_comment("", "first"), "first");
        assert_eq!(append_comment("first", "second"), "first\nsecond");
        // Never overwrites what is already there
        let twice = append_comment(&append_comment("", "a"), "b");
        assert_eq!(twice, "a\nb");
    }

    #[test]
    fn test_signed_comment_shape() {
        assert_eq!(
            signed_comment("Ivan", "2025-06-01 10:00:00", "no fuel"),
            "Ivan (2025-06-01 10:00:00): no fuel"
        );
        assert_eq!(signed_ack("Ivan", "10:00"), "Ivan (10:00)");
    }

    #[test]
    fn test_task_row_from_short_cells() {
        let cells = vec!["2025-06-01".to_string(), "Ivan".to_string()];
        let row = TaskRow::from_cells(2, &cells);
        assert_eq!(row.index, 2);
        assert_eq!(row.date, "2025-06-01");
        assert_eq!(row.driver, "Ivan");
        assert!(row.status.is_empty());
        assert!(row.subtasks.iter().all(|(d, s)| d.is_empty() && s.is_empty()));
    }

    #[test]
    fn test_task_row_matches_waiting_driver() {
        let mut cells = vec![String::new(); 15];
        cells[0] = "2025-06-01".to_string();
        cells[1] = "Ivan".to_string();
        let row = TaskRow::from_cells(2, &cells);
        assert!(row.matches_waiting_driver("2025-06-01", "Ivan"));
        assert!(!row.matches_waiting_driver("2025-06-02", "Ivan"));
        assert!(!row.matches_waiting_driver("2025-06-01", "Petr"));

        cells[6] = STATUS_IN_PROGRESS.to_string();
        let taken = TaskRow::from_cells(2, &cells);
        assert!(!taken.matches_waiting_driver("2025-06-01", "Ivan"));
    }

    #[test]
    fn test_header_matches_both_spellings() {
        let en: Vec<String> = ["Date", "Driver", "Status"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ru: Vec<String> = ["Дата", "Водитель", "Статус"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert!(header_matches(&en, &TASK_SHEET_MARKERS));
        assert!(header_matches(&ru, &TASK_SHEET_MARKERS));
        assert!(!header_matches(&en, &ROSTER_SHEET_MARKERS));
    }
}
