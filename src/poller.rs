//! # Task Polling Module
//!
//! Two timer-driven loops reconcile the tasks sheet against per-chat
//! session state. The primary loop pushes new task rows to waiting chats;
//! the secondary loop pushes sub-task slots of rows that are in progress.
//! Both loops only push — they never wait for a reply — and both mark what
//! they pushed inside a single locked pass over the session store, so a
//! row is pushed to a chat at most once while it sits in the sent-set.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bot::ui_builder::{subtask_keyboard, subtask_text, task_card_keyboard, task_card_text, Outgoing};
use crate::config::BotConfig;
use crate::dialogue::FlowState;
use crate::gateway::SheetGateway;
use crate::records::{self, TaskRow, STATUS_IN_PROGRESS};
use crate::session::SessionStore;
use crate::sheets::SheetsApi;

/// One pass of the primary task loop.
///
/// Reads the task sheet once, then matches every waiting session against
/// the rows in row order: first row dated today, naming the session's
/// driver, with an empty status and an unsent index wins. At most one push
/// per chat per scan. An unreachable datastore skips the pass entirely
/// without touching any state.
pub async fn scan_tasks<A: SheetsApi>(
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Vec<Outgoing> {
    let Some(sheet) = gateway.tasks_sheet() else {
        return Vec::new();
    };
    let rows = match gateway.read_all(&sheet).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "task scan skipped: datastore unreachable");
            return Vec::new();
        }
    };

    let now = records::now_local(&cfg.tz);
    let today = records::date_string(&now);
    let lang = Some(cfg.locale.as_str());

    store
        .with_all(|sessions| {
            let mut pushes = Vec::new();
            for (chat, session) in sessions.iter_mut() {
                if !session.waiting || session.driver_name.is_empty() {
                    continue;
                }
                // Row order: lowest sheet row wins ties
                for (i, cells) in rows.iter().enumerate().skip(1) {
                    let row = TaskRow::from_cells(i + 1, cells);
                    if !row.matches_waiting_driver(&today, &session.driver_name)
                        || session.sent_tasks.contains(&row.index)
                    {
                        continue;
                    }
                    debug!(user_id = %chat, row = row.index, "pushing task card");
                    session.sent_tasks.insert(row.index);
                    session.current_row = Some(row.index);
                    session.waiting = false;
                    session.flow = FlowState::AwaitingTaskDecision;
                    pushes.push(Outgoing::with_markup(
                        *chat,
                        task_card_text(&row, lang),
                        task_card_keyboard(row.index, lang),
                    ));
                    break;
                }
            }
            pushes
        })
        .await
}

/// One pass of the secondary (sub-task) loop.
///
/// Only rows whose primary status is exactly "in progress" are considered.
/// Each non-empty description with an empty status cell is pushed once per
/// (row, slot) key; acknowledgements are written by the callback handlers,
/// independent of the primary task lifecycle.
pub async fn scan_subtasks<A: SheetsApi>(
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Vec<Outgoing> {
    let Some(sheet) = gateway.tasks_sheet() else {
        return Vec::new();
    };

    let candidates: Vec<_> = store
        .with_all(|sessions| {
            sessions
                .iter()
                .filter_map(|(chat, s)| s.current_row.map(|row| (*chat, row)))
                .collect()
        })
        .await;

    let lang = Some(cfg.locale.as_str());
    let mut pushes = Vec::new();
    for (chat, row_index) in candidates {
        let cells = match gateway.read_row(&sheet, row_index).await {
            Ok(cells) => cells,
            Err(e) => {
                warn!(user_id = %chat, error = %e, "sub-task scan skipped for chat");
                continue;
            }
        };
        let row = TaskRow::from_cells(row_index, &cells);
        if row.status != STATUS_IN_PROGRESS {
            continue;
        }

        for (slot, (description, status)) in row.subtasks.iter().enumerate() {
            if description.is_empty() || !status.is_empty() {
                continue;
            }
            // Re-check under the lock so a racing decline/complete cannot
            // resurrect a released row
            let fresh = store
                .update(chat, |s| {
                    if s.current_row == Some(row_index)
                        && !s.sent_subtasks.contains(&(row_index, slot))
                    {
                        s.sent_subtasks.insert((row_index, slot));
                        true
                    } else {
                        false
                    }
                })
                .await
                .unwrap_or(false);
            if fresh {
                debug!(user_id = %chat, row = row_index, slot, "pushing sub-task prompt");
                pushes.push(Outgoing::with_markup(
                    chat,
                    subtask_text(description, lang),
                    subtask_keyboard(row_index, slot, lang),
                ));
            }
        }
    }
    pushes
}

/// Spawn both polling loops. Each loop re-attempts sheet discovery while
/// the gateway is unready, sleeps its configured interval between scans
/// and pushes whatever its scan produced.
pub fn spawn_pollers<A: SheetsApi + 'static>(
    bot: teloxide::Bot,
    store: SessionStore,
    gateway: Arc<SheetGateway<A>>,
    cfg: Arc<BotConfig>,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let primary = {
        let bot = bot.clone();
        let store = store.clone();
        let gateway = Arc::clone(&gateway);
        let cfg = Arc::clone(&cfg);
        tokio::spawn(async move {
            let mut timer =
                tokio::time::interval(std::time::Duration::from_secs(cfg.task_poll_secs));
            loop {
                timer.tick().await;
                if !gateway.is_ready() {
                    if let Err(e) = gateway.discover_functional_sheets().await {
                        debug!(error = %e, "sheet discovery attempt failed");
                        continue;
                    }
                }
                let pushes = scan_tasks(&store, &gateway, &cfg).await;
                if let Err(e) = crate::bot::send_all(&bot, pushes).await {
                    warn!(error = %e, "failed to push task card");
                }
            }
        })
    };

    let secondary = {
        tokio::spawn(async move {
            let mut timer =
                tokio::time::interval(std::time::Duration::from_secs(cfg.subtask_poll_secs));
            loop {
                timer.tick().await;
                if !gateway.is_ready() {
                    continue;
                }
                let pushes = scan_subtasks(&store, &gateway, &cfg).await;
                if let Err(e) = crate::bot::send_all(&bot, pushes).await {
                    warn!(error = %e, "failed to push sub-task prompt");
                }
            }
        })
    };

    (primary, secondary)
}
