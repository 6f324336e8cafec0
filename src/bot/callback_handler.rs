//! Callback Handler module for processing inline keyboard callback queries
//!
//! The inline buttons carry the task row (and sub-task slot) they refer to,
//! so a stale button press can be detected against the session's active row
//! and answered with an error instead of mutating the wrong row.

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::{debug, error, warn};

use crate::config::BotConfig;
use crate::dialogue::FlowState;
use crate::gateway::SheetGateway;
use crate::localization::t_lang;
use crate::records::{self, task_col};
use crate::session::{Session, SessionStore};
use crate::sheets::{CellWrite, SheetsApi};

use super::message_handler::send_all;
use super::ui_builder::{
    main_menu_keyboard, remove_keyboard, Outgoing, CB_SUB_ACCEPT, CB_SUB_DECLINE, CB_TASK_ACCEPT,
    CB_TASK_DECLINE,
};

fn lang(cfg: &BotConfig) -> Option<&str> {
    Some(cfg.locale.as_str())
}

fn soft_failure(chat: ChatId, cfg: &BotConfig) -> Vec<Outgoing> {
    vec![Outgoing::text(chat, t_lang("error-sheet-unavailable", lang(cfg)))]
}

/// Route one callback-query payload through the task workflow.
pub async fn dispatch_callback<A: SheetsApi>(
    chat: ChatId,
    data: &str,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let Some(session) = store.get(chat).await else {
        debug!(user_id = %chat, "ignoring callback from unknown chat");
        return Ok(vec![]);
    };

    if let Some(row) = parse_index(data, CB_TASK_ACCEPT) {
        return accept_task(chat, row, &session, store, gateway, cfg).await;
    }
    if let Some(row) = parse_index(data, CB_TASK_DECLINE) {
        return decline_task(chat, row, &session, store, cfg).await;
    }
    if let Some((row, slot)) = parse_pair(data, CB_SUB_ACCEPT) {
        return accept_subtask(chat, row, slot, &session, store, gateway, cfg).await;
    }
    if let Some((row, slot)) = parse_pair(data, CB_SUB_DECLINE) {
        return decline_subtask(chat, row, slot, &session, store, cfg).await;
    }

    debug!(user_id = %chat, data, "unrecognized callback payload");
    Ok(vec![])
}

fn parse_index(data: &str, prefix: &str) -> Option<usize> {
    data.strip_prefix(prefix)?.parse().ok()
}

fn parse_pair(data: &str, prefix: &str) -> Option<(usize, usize)> {
    let rest = data.strip_prefix(prefix)?;
    let (row, slot) = rest.split_once(':')?;
    Some((row.parse().ok()?, slot.parse().ok()?))
}

/// The pressed button must refer to the session's active row; anything
/// else is a stale card and resets the chat to a safe waiting state.
async fn stale_card(
    chat: ChatId,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    warn!(user_id = %chat, "callback references a task that is not active");
    let route_open = store
        .update(chat, |s| {
            if s.current_row.is_none() {
                s.enter_idle();
            }
            s.route_open()
        })
        .await
        .unwrap_or(false);
    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("error-no-active-task", lang(cfg)),
        main_menu_keyboard(route_open, lang(cfg)),
    )])
}

async fn accept_task<A: SheetsApi>(
    chat: ChatId,
    row: usize,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    if session.current_row != Some(row) {
        return stale_card(chat, store, cfg).await;
    }
    let Some(tasks) = gateway.tasks_sheet() else {
        return Ok(soft_failure(chat, cfg));
    };

    let now = records::now_local(&cfg.tz);
    let writes = vec![
        CellWrite::new(row, task_col::ACCEPTED, records::timestamp_string(&now)),
        CellWrite::new(row, task_col::STATUS, records::STATUS_IN_PROGRESS),
    ];
    if let Err(e) = gateway.write_cells(&tasks, writes).await {
        warn!(user_id = %chat, error = %e, "failed to accept task row");
        return Ok(soft_failure(chat, cfg));
    }

    store.update(chat, |s| s.flow = FlowState::AwaitingEta).await;
    Ok(vec![Outgoing::text(
        chat,
        format!(
            "{}\n\n{}",
            t_lang("task-accepted", lang(cfg)),
            t_lang("prompt-eta", lang(cfg))
        ),
    )])
}

async fn decline_task(
    chat: ChatId,
    row: usize,
    session: &Session,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    if session.current_row != Some(row) {
        return stale_card(chat, store, cfg).await;
    }
    // Pre-acceptance decline only clears the assignment cells
    store
        .update(chat, |s| {
            s.flow = FlowState::AwaitingDeclineReason { full_clear: false }
        })
        .await;
    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("prompt-decline-reason", lang(cfg)),
        remove_keyboard(),
    )])
}

async fn accept_subtask<A: SheetsApi>(
    chat: ChatId,
    row: usize,
    slot: usize,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let Some((_, status_col)) = task_col::SUBTASKS.get(slot).copied() else {
        return Ok(vec![]);
    };
    if session.current_row != Some(row) {
        return stale_card(chat, store, cfg).await;
    }
    let Some(tasks) = gateway.tasks_sheet() else {
        return Ok(soft_failure(chat, cfg));
    };

    let now = records::now_local(&cfg.tz);
    let ack = records::signed_ack(&session.driver_name, &records::timestamp_string(&now));
    if let Err(e) = gateway.write_cell(&tasks, row, status_col, ack).await {
        warn!(user_id = %chat, error = %e, "failed to acknowledge sub-task");
        return Ok(soft_failure(chat, cfg));
    }
    Ok(vec![Outgoing::text(
        chat,
        t_lang("subtask-accepted", lang(cfg)),
    )])
}

async fn decline_subtask(
    chat: ChatId,
    row: usize,
    slot: usize,
    session: &Session,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    if task_col::SUBTASKS.get(slot).is_none() {
        return Ok(vec![]);
    }
    if session.current_row != Some(row) {
        return stale_card(chat, store, cfg).await;
    }
    store
        .update(chat, move |s| {
            s.flow = FlowState::AwaitingSubtaskReason { slot }
        })
        .await;
    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("prompt-subtask-reason", lang(cfg)),
        remove_keyboard(),
    )])
}

/// Endpoint wired into the dispatcher for callback-query updates.
pub async fn callback_handler<A: SheetsApi>(
    bot: Bot,
    q: CallbackQuery,
    store: SessionStore,
    gateway: Arc<SheetGateway<A>>,
    cfg: Arc<BotConfig>,
) -> Result<()> {
    if let Some(msg) = &q.message {
        let chat = msg.chat().id;
        let data = q.data.clone().unwrap_or_default();
        match dispatch_callback(chat, &data, &store, &gateway, &cfg).await {
            Ok(replies) => send_all(&bot, replies).await?,
            Err(e) => {
                error!(user_id = %chat, error = %e, "callback handler failed");
                bot.send_message(chat, t_lang("error-generic", Some(cfg.locale.as_str())))
                    .await?;
            }
        }
    }

    // Answer the callback query to remove the loading state
    bot.answer_callback_query(q.id).await?;

    Ok(())
}
