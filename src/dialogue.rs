//! Conversation state for the per-chat workflow dialogues.

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Which photo the bot is currently waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhotoKind {
    StartOdometer,
    EndOdometer,
    Refuel,
    ParcelReceive,
    ParcelSend,
}

/// Represents the conversation state of a single chat.
///
/// Every prompt the bot sends registers exactly one expected next step by
/// assigning the matching state here; a fresh `/start` or top-level menu
/// choice simply replaces it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum FlowState {
    /// No registration yet; everything except `/start` is ignored
    #[default]
    Start,
    AwaitingInviteCode,
    AwaitingName,
    /// At the main menu; eligible for task pushes when no task is active
    Idle,
    ChoosingMachine,
    AwaitingStartOdometer,
    AwaitingRefuelOdometer,
    AwaitingRefuelLiters,
    AwaitingEndOdometer,
    AwaitingBranch,
    AwaitingParcelAction,
    AwaitingReceiveCount,
    AwaitingSendCount,
    AwaitingPhoto(PhotoKind),
    /// A task card was pushed; accept/decline buttons pending
    AwaitingTaskDecision,
    AwaitingEta,
    /// Accepted task: completed/decline/comment menu
    TaskMenu,
    /// Decline reason pending. `full_clear` also wipes the accepted
    /// time, ETA and status cells (decline after acceptance).
    AwaitingDeclineReason { full_clear: bool },
    AwaitingComment,
    /// Free-text reason for a declined sub-task slot
    AwaitingSubtaskReason { slot: usize },
}

static DECIMAL_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\d+(?:[.,]\d+)?$").expect("valid decimal pattern"));
static INTEGER_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\d+$").expect("valid integer pattern"));

/// Parse a fuel quantity, accepting comma or dot as the decimal separator.
pub fn parse_liters(input: &str) -> Result<f64, &'static str> {
    let trimmed = input.trim();
    if trimmed.is_empty() || !DECIMAL_RE.is_match(trimmed) {
        return Err("not-numeric");
    }
    trimmed
        .replace(',', ".")
        .parse::<f64>()
        .map_err(|_| "not-numeric")
}

/// Parse an odometer reading (a plain non-negative integer).
pub fn parse_odometer(input: &str) -> Result<i64, &'static str> {
    let trimmed = input.trim();
    if !INTEGER_RE.is_match(trimmed) {
        return Err("not-numeric");
    }
    trimmed.parse::<i64>().map_err(|_| "not-numeric")
}

/// Validate a driver name input.
pub fn validate_driver_name(name: &str) -> Result<String, &'static str> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err("empty");
    }

    if trimmed.len() > 100 {
        return Err("too_long");
    }

    Ok(trimmed.to_string())
}
