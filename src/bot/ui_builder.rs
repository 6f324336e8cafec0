//! UI Builder module for creating keyboards and formatting messages

use teloxide::types::{
    ChatId, FileId, InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup,
    ReplyMarkup,
};

// Import localization
use crate::localization::{t_args_lang, t_lang};

// Import sheet records
use crate::records::TaskRow;

/// Callback-data prefixes for the inline task/sub-task buttons
pub const CB_TASK_ACCEPT: &str = "task_accept:";
pub const CB_TASK_DECLINE: &str = "task_decline:";
pub const CB_SUB_ACCEPT: &str = "sub_accept:";
pub const CB_SUB_DECLINE: &str = "sub_decline:";

/// One outbound chat message, produced by the dispatch functions and sent
/// by the transport layer.
#[derive(Debug, Clone)]
pub enum Outgoing {
    Text {
        chat: ChatId,
        text: String,
        markup: Option<ReplyMarkup>,
    },
    Photo {
        chat: ChatId,
        file: FileId,
        caption: String,
    },
}

impl Outgoing {
    pub fn text(chat: ChatId, text: impl Into<String>) -> Self {
        Outgoing::Text {
            chat,
            text: text.into(),
            markup: None,
        }
    }

    pub fn with_markup(
        chat: ChatId,
        text: impl Into<String>,
        markup: impl Into<ReplyMarkup>,
    ) -> Self {
        Outgoing::Text {
            chat,
            text: text.into(),
            markup: Some(markup.into()),
        }
    }

    pub fn photo(chat: ChatId, file: FileId, caption: impl Into<String>) -> Self {
        Outgoing::Photo {
            chat,
            file,
            caption: caption.into(),
        }
    }
}

fn button_rows(labels: Vec<Vec<String>>) -> Vec<Vec<KeyboardButton>> {
    labels
        .into_iter()
        .map(|row| row.into_iter().map(KeyboardButton::new).collect())
        .collect()
}

/// Main menu. The offered buttons depend on whether a route is open,
/// mirroring what the drivers are used to.
pub fn main_menu_keyboard(route_open: bool, language_code: Option<&str>) -> KeyboardMarkup {
    let rows: Vec<Vec<String>> = if route_open {
        vec![vec![
            t_lang("menu-refuel", language_code),
            t_lang("menu-end-route", language_code),
            t_lang("menu-parcel", language_code),
        ]]
    } else {
        vec![
            vec![t_lang("menu-parcel", language_code)],
            vec![t_lang("menu-begin-route", language_code)],
        ]
    };
    KeyboardMarkup::new(button_rows(rows)).resize_keyboard()
}

/// One machine per row, as the machine list can be long.
pub fn machines_keyboard(machines: &[String]) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = machines
        .iter()
        .map(|m| vec![KeyboardButton::new(m.as_str())])
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard()
}

pub fn parcel_actions_keyboard(language_code: Option<&str>) -> KeyboardMarkup {
    let rows = vec![
        vec![
            t_lang("parcel-receive", language_code),
            t_lang("parcel-send", language_code),
            t_lang("parcel-none", language_code),
        ],
        vec![t_lang("menu-back", language_code)],
    ];
    KeyboardMarkup::new(button_rows(rows)).resize_keyboard()
}

/// Completed / decline / comment menu for an accepted task.
pub fn task_menu_keyboard(language_code: Option<&str>) -> KeyboardMarkup {
    let rows = vec![vec![
        t_lang("btn-complete", language_code),
        t_lang("btn-decline", language_code),
        t_lang("btn-comment", language_code),
    ]];
    KeyboardMarkup::new(button_rows(rows)).resize_keyboard()
}

pub fn remove_keyboard() -> ReplyMarkup {
    ReplyMarkup::kb_remove()
}

/// Formatted task card pushed by the task poller.
pub fn task_card_text(row: &TaskRow, language_code: Option<&str>) -> String {
    t_args_lang(
        "task-card",
        &[
            ("date", row.date.as_str()),
            ("machine", row.machine.as_str()),
            ("planned", row.planned.as_str()),
        ],
        language_code,
    )
}

/// Inline accept/decline controls for a task card.
pub fn task_card_keyboard(row_index: usize, language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback(
            t_lang("btn-accept", language_code),
            format!("{CB_TASK_ACCEPT}{row_index}"),
        ),
        InlineKeyboardButton::callback(
            t_lang("btn-decline", language_code),
            format!("{CB_TASK_DECLINE}{row_index}"),
        ),
    ]])
}

pub fn subtask_text(description: &str, language_code: Option<&str>) -> String {
    t_args_lang("subtask-card", &[("description", description)], language_code)
}

/// Inline accept/decline controls for one sub-task slot.
pub fn subtask_keyboard(
    row_index: usize,
    slot: usize,
    language_code: Option<&str>,
) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback(
            t_lang("btn-accept", language_code),
            format!("{CB_SUB_ACCEPT}{row_index}:{slot}"),
        ),
        InlineKeyboardButton::callback(
            t_lang("btn-decline", language_code),
            format!("{CB_SUB_DECLINE}{row_index}:{slot}"),
        ),
    ]])
}
