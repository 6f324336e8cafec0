//! Dialogue Manager module for handling workflow state transitions
//!
//! Every handler advances exactly one chat through one step of a workflow:
//! it validates the input, talks to the spreadsheet gateway where the step
//! persists something, mutates the session through the store, and returns
//! the outbound messages as data. Gateway failures never advance state —
//! the driver is told the sheet is unavailable and stays on the same step.

use anyhow::Result;
use teloxide::types::{ChatId, FileId};
use tracing::warn;

use crate::config::BotConfig;
use crate::dialogue::{parse_liters, parse_odometer, validate_driver_name, FlowState, PhotoKind};
use crate::gateway::SheetGateway;
use crate::localization::{t_args_lang, t_lang};
use crate::records::{self, fuel_col, task_col, trip_col, FUEL_SHEET_HEADER};
use crate::session::{Session, SessionStore};
use crate::sheets::{CellWrite, SheetsApi};

use super::ui_builder::{
    machines_keyboard, main_menu_keyboard, parcel_actions_keyboard, remove_keyboard,
    task_menu_keyboard, Outgoing,
};

fn lang(cfg: &BotConfig) -> Option<&str> {
    Some(cfg.locale.as_str())
}

fn soft_failure(chat: ChatId, cfg: &BotConfig) -> Vec<Outgoing> {
    vec![Outgoing::text(chat, t_lang("error-sheet-unavailable", lang(cfg)))]
}

/// Missing active-task context: report it and force the session back to a
/// safe waiting state instead of failing silently.
async fn reset_to_waiting(
    chat: ChatId,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Vec<Outgoing> {
    let route_open = store
        .update(chat, |s| {
            s.current_row = None;
            s.enter_idle();
            s.route_open()
        })
        .await
        .unwrap_or(false);
    vec![Outgoing::with_markup(
        chat,
        t_lang("error-no-active-task", lang(cfg)),
        main_menu_keyboard(route_open, lang(cfg)),
    )]
}

/// `/start`: replace whatever was pending with a fresh registration.
pub async fn handle_start(
    chat: ChatId,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let already_registered = store
        .get(chat)
        .await
        .map(|s| !s.driver_name.is_empty())
        .unwrap_or(false);

    let mut session = Session::default();
    let prompt = if already_registered || cfg.invite_code.is_none() {
        session.flow = FlowState::AwaitingName;
        t_lang("prompt-name", lang(cfg))
    } else {
        session.flow = FlowState::AwaitingInviteCode;
        t_lang("prompt-invite-code", lang(cfg))
    };
    store.create(chat, session).await;
    Ok(vec![Outgoing::with_markup(chat, prompt, remove_keyboard())])
}

pub async fn handle_invite_code(
    chat: ChatId,
    text: &str,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let accepted = cfg
        .invite_code
        .as_deref()
        .map(|code| code == text.trim())
        .unwrap_or(true);

    if accepted {
        store.update(chat, |s| s.flow = FlowState::AwaitingName).await;
        Ok(vec![Outgoing::text(chat, t_lang("invite-accepted", lang(cfg)))])
    } else {
        // Back to square one: further messages are ignored until /start
        store.update(chat, |s| s.flow = FlowState::Start).await;
        Ok(vec![Outgoing::text(chat, t_lang("invite-denied", lang(cfg)))])
    }
}

pub async fn handle_name<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let name = match validate_driver_name(text) {
        Ok(name) => name,
        Err(_) => {
            return Ok(vec![Outgoing::text(chat, t_lang("name-invalid", lang(cfg)))]);
        }
    };

    store.create(chat, Session::new(name.clone())).await;

    // Roster updates are best-effort: absence of the roster sheet or a
    // failed append never blocks registration.
    if let Some(roster) = gateway.roster_sheet() {
        let now = records::now_local(&cfg.tz);
        let row = vec![records::date_string(&now), name, chat.0.to_string()];
        if let Err(e) = gateway.append_row(&roster, row).await {
            warn!(user_id = %chat, error = %e, "failed to append roster row");
        }
    }

    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("choose-action", lang(cfg)),
        main_menu_keyboard(false, lang(cfg)),
    )])
}

/// Main menu input. Unknown text simply re-shows the menu.
pub async fn handle_menu_choice<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let l = lang(cfg);

    if text == t_lang("menu-begin-route", l) {
        let machines = match gateway
            .column_values(&cfg.trip_sheet, trip_col::MACHINE_LIST)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                warn!(user_id = %chat, error = %e, "machine list unavailable");
                return Ok(soft_failure(chat, cfg));
            }
        };
        if machines.is_empty() {
            return Ok(soft_failure(chat, cfg));
        }
        let keyboard = machines_keyboard(&machines);
        store
            .update(chat, |s| {
                s.machine_choices = machines;
                s.flow = FlowState::ChoosingMachine;
                s.waiting = false;
            })
            .await;
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("choose-machine", l),
            keyboard,
        )]);
    }

    if text == t_lang("menu-refuel", l) {
        if !session.route_open() {
            return Ok(vec![Outgoing::text(chat, t_lang("route-no-machine", l))]);
        }
        store
            .update(chat, |s| {
                s.flow = FlowState::AwaitingRefuelOdometer;
                s.waiting = false;
            })
            .await;
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("prompt-refuel-odometer", l),
            remove_keyboard(),
        )]);
    }

    if text == t_lang("menu-end-route", l) {
        if !session.route_open() {
            return Ok(vec![Outgoing::text(chat, t_lang("route-no-machine", l))]);
        }
        store
            .update(chat, |s| {
                s.flow = FlowState::AwaitingEndOdometer;
                s.waiting = false;
            })
            .await;
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("prompt-end-odometer", l),
            remove_keyboard(),
        )]);
    }

    if text == t_lang("menu-parcel", l) {
        store
            .update(chat, |s| {
                s.flow = FlowState::AwaitingBranch;
                s.waiting = false;
            })
            .await;
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("parcel-branch-prompt", l),
            remove_keyboard(),
        )]);
    }

    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("choose-action", l),
        main_menu_keyboard(session.route_open(), l),
    )])
}

pub async fn handle_machine_choice(
    chat: ChatId,
    text: &str,
    session: &Session,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let choice = text.trim();
    if !session.machine_choices.iter().any(|m| m == choice) {
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("machine-unknown", lang(cfg)),
            machines_keyboard(&session.machine_choices),
        )]);
    }

    let choice = choice.to_string();
    store
        .update(chat, move |s| {
            s.machine = Some(choice);
            s.flow = FlowState::AwaitingStartOdometer;
        })
        .await;
    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("prompt-start-odometer", lang(cfg)),
        remove_keyboard(),
    )])
}

/// Open a trip log row. The session only advances to the photo step once
/// the row is actually written.
pub async fn handle_start_odometer<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let odometer = match parse_odometer(text) {
        Ok(v) => v,
        Err(_) => {
            return Ok(vec![Outgoing::text(
                chat,
                t_lang("error-not-an-odometer", lang(cfg)),
            )]);
        }
    };

    let Some(machine) = session.machine.clone() else {
        return Ok(reset_route(chat, store, cfg).await);
    };

    let now = records::now_local(&cfg.tz);
    let date = records::date_string(&now);
    let row = vec![
        date.clone(),
        session.driver_name.clone(),
        machine,
        records::time_string(&now),
        odometer.to_string(),
        String::new(),
        String::new(),
        String::new(),
    ];
    if let Err(e) = gateway.append_row(&cfg.trip_sheet, row).await {
        warn!(user_id = %chat, error = %e, "failed to open trip row");
        return Ok(soft_failure(chat, cfg));
    }

    store
        .update(chat, move |s| {
            s.trip_date = Some(date);
            s.start_odometer = Some(odometer);
            s.flow = FlowState::AwaitingPhoto(PhotoKind::StartOdometer);
        })
        .await;
    Ok(vec![Outgoing::text(
        chat,
        t_lang("prompt-photo-odometer", lang(cfg)),
    )])
}

pub async fn handle_refuel_odometer(
    chat: ChatId,
    text: &str,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let odometer = match parse_odometer(text) {
        Ok(v) => v,
        Err(_) => {
            return Ok(vec![Outgoing::text(
                chat,
                t_lang("error-not-an-odometer", lang(cfg)),
            )]);
        }
    };
    store
        .update(chat, move |s| {
            s.refuel_odometer = Some(odometer);
            s.flow = FlowState::AwaitingRefuelLiters;
        })
        .await;
    Ok(vec![Outgoing::text(
        chat,
        t_lang("prompt-refuel-liters", lang(cfg)),
    )])
}

/// Append a fuel log row. Consumption is derived from the previous row on
/// the machine's sheet when one exists; an unusable odometer delta yields
/// the error marker instead of a number.
pub async fn handle_refuel_liters<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let liters = match parse_liters(text) {
        Ok(v) => v,
        Err(_) => {
            return Ok(vec![Outgoing::text(
                chat,
                t_lang("error-not-a-number", lang(cfg)),
            )]);
        }
    };

    let (Some(machine), Some(odometer)) = (session.machine.clone(), session.refuel_odometer)
    else {
        return Ok(reset_route(chat, store, cfg).await);
    };

    if let Err(e) = gateway.ensure_sheet(&machine, &FUEL_SHEET_HEADER).await {
        warn!(user_id = %chat, error = %e, "failed to ensure fuel sheet");
        return Ok(soft_failure(chat, cfg));
    }
    let rows = match gateway.read_all(&machine).await {
        Ok(r) => r,
        Err(e) => {
            warn!(user_id = %chat, error = %e, "failed to read fuel sheet");
            return Ok(soft_failure(chat, cfg));
        }
    };

    // First data row on a fresh sheet has nothing to diff against
    let consumption_cell = if rows.len() >= 2 {
        match rows
            .last()
            .and_then(|r| r.get(fuel_col::ODOMETER - 1))
            .and_then(|v| v.trim().parse::<i64>().ok())
        {
            Some(previous) => records::consumption(liters, previous, odometer).to_cell(),
            None => records::Consumption::Invalid.to_cell(),
        }
    } else {
        String::new()
    };

    let now = records::now_local(&cfg.tz);
    let row = vec![
        records::timestamp_string(&now),
        session.driver_name.clone(),
        records::format_decimal_comma(liters),
        odometer.to_string(),
        consumption_cell,
    ];
    if let Err(e) = gateway.append_row(&machine, row).await {
        warn!(user_id = %chat, error = %e, "failed to append fuel row");
        return Ok(soft_failure(chat, cfg));
    }

    store
        .update(chat, |s| s.flow = FlowState::AwaitingPhoto(PhotoKind::Refuel))
        .await;
    Ok(vec![Outgoing::text(
        chat,
        t_lang("prompt-photo-refuel", lang(cfg)),
    )])
}

/// Close the open trip row: scan backward for the date+driver+machine
/// match and fill the end time, end odometer and mileage in one batch.
pub async fn handle_end_odometer<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let end_odometer = match parse_odometer(text) {
        Ok(v) => v,
        Err(_) => {
            return Ok(vec![Outgoing::text(
                chat,
                t_lang("error-not-an-odometer", lang(cfg)),
            )]);
        }
    };

    let Some(machine) = session.machine.clone() else {
        return Ok(reset_route(chat, store, cfg).await);
    };

    let rows = match gateway.read_all(&cfg.trip_sheet).await {
        Ok(r) => r,
        Err(e) => {
            warn!(user_id = %chat, error = %e, "failed to read trip sheet");
            return Ok(soft_failure(chat, cfg));
        }
    };

    let now = records::now_local(&cfg.tz);
    let date = session
        .trip_date
        .clone()
        .unwrap_or_else(|| records::date_string(&now));

    let cell = |r: &[String], col: usize| r.get(col - 1).map(|v| v.trim().to_string());
    let found = rows
        .iter()
        .enumerate()
        .skip(1)
        .rev()
        .find(|(_, r)| {
            cell(r, trip_col::DATE).as_deref() == Some(date.as_str())
                && cell(r, trip_col::DRIVER).as_deref() == Some(session.driver_name.as_str())
                && cell(r, trip_col::MACHINE).as_deref() == Some(machine.as_str())
        })
        .map(|(i, r)| (i + 1, r.clone()));

    let Some((sheet_row, row)) = found else {
        warn!(user_id = %chat, "no open trip row matched; resetting route state");
        let route_open = store
            .update(chat, |s| {
                s.machine = None;
                s.trip_date = None;
                s.start_odometer = None;
                s.refuel_odometer = None;
                s.enter_idle();
                s.route_open()
            })
            .await
            .unwrap_or(false);
        return Ok(vec![
            Outgoing::text(chat, t_lang("route-not-found", lang(cfg))),
            Outgoing::with_markup(
                chat,
                t_lang("choose-action", lang(cfg)),
                main_menu_keyboard(route_open, lang(cfg)),
            ),
        ]);
    };

    let start_odometer = cell(&row, trip_col::START_ODOMETER)
        .and_then(|v| v.parse::<i64>().ok())
        .or(session.start_odometer);
    let mileage_cell = start_odometer
        .map(|start| records::mileage(start, end_odometer).to_string())
        .unwrap_or_default();

    let writes = vec![
        CellWrite::new(sheet_row, trip_col::END_TIME, records::time_string(&now)),
        CellWrite::new(sheet_row, trip_col::END_ODOMETER, end_odometer.to_string()),
        CellWrite::new(sheet_row, trip_col::MILEAGE, mileage_cell),
    ];
    if let Err(e) = gateway.write_cells(&cfg.trip_sheet, writes).await {
        warn!(user_id = %chat, error = %e, "failed to close trip row");
        return Ok(soft_failure(chat, cfg));
    }

    store
        .update(chat, |s| {
            s.flow = FlowState::AwaitingPhoto(PhotoKind::EndOdometer)
        })
        .await;
    Ok(vec![Outgoing::text(
        chat,
        t_lang("prompt-photo-end-odometer", lang(cfg)),
    )])
}

/// Abandon the route sub-flow when its scratch context is gone.
async fn reset_route(chat: ChatId, store: &SessionStore, cfg: &BotConfig) -> Vec<Outgoing> {
    let route_open = store
        .update(chat, |s| {
            s.machine = None;
            s.trip_date = None;
            s.start_odometer = None;
            s.refuel_odometer = None;
            s.enter_idle();
            s.route_open()
        })
        .await
        .unwrap_or(false);
    vec![Outgoing::with_markup(
        chat,
        t_lang("route-no-machine", lang(cfg)),
        main_menu_keyboard(route_open, lang(cfg)),
    )]
}

pub async fn handle_branch(
    chat: ChatId,
    text: &str,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let branch = text.trim().to_string();
    store
        .update(chat, move |s| {
            s.branch = Some(branch);
            s.flow = FlowState::AwaitingParcelAction;
        })
        .await;
    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("choose-action", lang(cfg)),
        parcel_actions_keyboard(lang(cfg)),
    )])
}

pub async fn handle_parcel_action(
    chat: ChatId,
    text: &str,
    session: &Session,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let l = lang(cfg);

    if text == t_lang("parcel-receive", l) {
        store
            .update(chat, |s| s.flow = FlowState::AwaitingReceiveCount)
            .await;
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("parcel-receive-count", l),
            remove_keyboard(),
        )]);
    }

    if text == t_lang("parcel-send", l) {
        store
            .update(chat, |s| s.flow = FlowState::AwaitingSendCount)
            .await;
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("parcel-send-count", l),
            remove_keyboard(),
        )]);
    }

    if text == t_lang("parcel-none", l) {
        let notice = t_args_lang(
            "notice-parcel-none",
            &[
                ("driver", session.driver_name.as_str()),
                ("branch", session.branch.as_deref().unwrap_or("-")),
            ],
            l,
        );
        let route_open = store
            .update(chat, |s| {
                s.branch = None;
                s.enter_idle();
                s.route_open()
            })
            .await
            .unwrap_or(false);
        return Ok(vec![
            Outgoing::text(cfg.parcel_channel, notice),
            Outgoing::with_markup(
                chat,
                t_lang("choose-next-action", l),
                main_menu_keyboard(route_open, l),
            ),
        ]);
    }

    if text == t_lang("menu-back", l) {
        let route_open = store
            .update(chat, |s| {
                s.branch = None;
                s.enter_idle();
                s.route_open()
            })
            .await
            .unwrap_or(false);
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("choose-action", l),
            main_menu_keyboard(route_open, l),
        )]);
    }

    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("choose-action", l),
        parcel_actions_keyboard(l),
    )])
}

pub async fn handle_parcel_count(
    chat: ChatId,
    text: &str,
    receiving: bool,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let count = text.trim().to_string();
    let kind = if receiving {
        PhotoKind::ParcelReceive
    } else {
        PhotoKind::ParcelSend
    };
    store
        .update(chat, move |s| {
            s.parcel_count = Some(count);
            s.flow = FlowState::AwaitingPhoto(kind);
        })
        .await;
    Ok(vec![Outgoing::text(
        chat,
        t_lang("prompt-photo-parcels", lang(cfg)),
    )])
}

/// A photo arrived. Forward it to the right notification channel with a
/// caption and return the chat to the menu.
pub async fn handle_photo(
    chat: ChatId,
    file: FileId,
    store: &SessionStore,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let l = lang(cfg);
    let Some(session) = store.get(chat).await else {
        return Ok(vec![Outgoing::text(chat, t_lang("use-start-first", l))]);
    };

    let FlowState::AwaitingPhoto(kind) = session.flow else {
        // No photo expected; nothing to do
        return Ok(vec![]);
    };

    let driver = session.driver_name.as_str();
    let mut replies = Vec::new();

    match kind {
        PhotoKind::StartOdometer => {
            replies.push(Outgoing::photo(
                cfg.photo_channel,
                file,
                t_args_lang("caption-start-odometer", &[("driver", driver)], l),
            ));
            let route_open = store
                .update(chat, |s| {
                    s.enter_idle();
                    s.route_open()
                })
                .await
                .unwrap_or(false);
            replies.push(Outgoing::with_markup(
                chat,
                t_lang("choose-action", l),
                main_menu_keyboard(route_open, l),
            ));
        }
        PhotoKind::EndOdometer => {
            replies.push(Outgoing::photo(
                cfg.photo_channel,
                file,
                t_args_lang("caption-end-odometer", &[("driver", driver)], l),
            ));
            store
                .update(chat, |s| {
                    s.machine = None;
                    s.trip_date = None;
                    s.start_odometer = None;
                    s.refuel_odometer = None;
                    s.enter_idle();
                })
                .await;
            replies.push(Outgoing::with_markup(
                chat,
                t_lang("route-finished", l),
                main_menu_keyboard(false, l),
            ));
        }
        PhotoKind::Refuel => {
            replies.push(Outgoing::photo(
                cfg.photo_channel,
                file,
                t_args_lang(
                    "caption-refuel",
                    &[
                        ("driver", driver),
                        ("machine", session.machine.as_deref().unwrap_or("-")),
                    ],
                    l,
                ),
            ));
            let route_open = store
                .update(chat, |s| {
                    s.enter_idle();
                    s.route_open()
                })
                .await
                .unwrap_or(false);
            replies.push(Outgoing::with_markup(
                chat,
                t_lang("refuel-saved", l),
                main_menu_keyboard(route_open, l),
            ));
        }
        PhotoKind::ParcelReceive | PhotoKind::ParcelSend => {
            let caption_key = if kind == PhotoKind::ParcelReceive {
                "caption-parcel-receive"
            } else {
                "caption-parcel-send"
            };
            replies.push(Outgoing::photo(
                cfg.parcel_channel,
                file,
                t_args_lang(
                    caption_key,
                    &[
                        ("driver", driver),
                        ("branch", session.branch.as_deref().unwrap_or("-")),
                        ("count", session.parcel_count.as_deref().unwrap_or("-")),
                    ],
                    l,
                ),
            ));
            let route_open = store
                .update(chat, |s| {
                    s.branch = None;
                    s.parcel_count = None;
                    s.enter_idle();
                    s.route_open()
                })
                .await
                .unwrap_or(false);
            replies.push(Outgoing::with_markup(
                chat,
                t_lang("choose-next-action", l),
                main_menu_keyboard(route_open, l),
            ));
        }
    }

    Ok(replies)
}

/// ETA input after accepting a task. The value is captured into the sheet
/// but never gates anything downstream; a failed write is only logged.
pub async fn handle_eta<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let Some(row) = session.current_row else {
        return Ok(reset_to_waiting(chat, store, cfg).await);
    };

    if let Some(tasks) = gateway.tasks_sheet() {
        if let Err(e) = gateway
            .write_cell(&tasks, row, task_col::ETA, text.trim())
            .await
        {
            warn!(user_id = %chat, error = %e, "failed to record ETA");
        }
    }

    store.update(chat, |s| s.flow = FlowState::TaskMenu).await;
    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("eta-saved", lang(cfg)),
        task_menu_keyboard(lang(cfg)),
    )])
}

/// Completed / decline / comment menu for the active task.
pub async fn handle_task_menu<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let l = lang(cfg);

    if text == t_lang("btn-complete", l) {
        let Some(row) = session.current_row else {
            return Ok(reset_to_waiting(chat, store, cfg).await);
        };
        let Some(tasks) = gateway.tasks_sheet() else {
            return Ok(soft_failure(chat, cfg));
        };
        let now = records::now_local(&cfg.tz);
        let writes = vec![
            CellWrite::new(row, task_col::STATUS, records::STATUS_COMPLETED),
            CellWrite::new(row, task_col::COMPLETED, records::timestamp_string(&now)),
        ];
        if let Err(e) = gateway.write_cells(&tasks, writes).await {
            warn!(user_id = %chat, error = %e, "failed to complete task row");
            return Ok(soft_failure(chat, cfg));
        }
        let route_open = store
            .update(chat, |s| {
                s.release_task(row);
                s.route_open()
            })
            .await
            .unwrap_or(false);
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("task-completed", l),
            main_menu_keyboard(route_open, l),
        )]);
    }

    if text == t_lang("btn-decline", l) {
        store
            .update(chat, |s| {
                s.flow = FlowState::AwaitingDeclineReason { full_clear: true }
            })
            .await;
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("prompt-decline-reason", l),
            remove_keyboard(),
        )]);
    }

    if text == t_lang("btn-comment", l) {
        store
            .update(chat, |s| s.flow = FlowState::AwaitingComment)
            .await;
        return Ok(vec![Outgoing::with_markup(
            chat,
            t_lang("prompt-comment", l),
            remove_keyboard(),
        )]);
    }

    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("use-buttons", l),
        task_menu_keyboard(l),
    )])
}

/// Decline reason input. Appends the timestamped reason to the comment
/// cell (never overwriting) and returns the row to the pool by clearing
/// its assignment cells.
pub async fn handle_decline_reason<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    full_clear: bool,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let Some(row) = session.current_row else {
        return Ok(reset_to_waiting(chat, store, cfg).await);
    };
    let Some(tasks) = gateway.tasks_sheet() else {
        return Ok(soft_failure(chat, cfg));
    };

    let existing = match gateway.read_cell(&tasks, row, task_col::COMMENT).await {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => {
            warn!(user_id = %chat, error = %e, "failed to read comment cell");
            return Ok(soft_failure(chat, cfg));
        }
    };

    let now = records::now_local(&cfg.tz);
    let comment = records::append_comment(
        &existing,
        &records::signed_comment(
            &session.driver_name,
            &records::timestamp_string(&now),
            text.trim(),
        ),
    );

    let mut writes = vec![
        CellWrite::new(row, task_col::COMMENT, comment),
        CellWrite::new(row, task_col::DRIVER, ""),
        CellWrite::new(row, task_col::MACHINE, ""),
    ];
    if full_clear {
        writes.push(CellWrite::new(row, task_col::ACCEPTED, ""));
        writes.push(CellWrite::new(row, task_col::ETA, ""));
        writes.push(CellWrite::new(row, task_col::STATUS, ""));
    }
    if let Err(e) = gateway.write_cells(&tasks, writes).await {
        warn!(user_id = %chat, error = %e, "failed to decline task row");
        return Ok(soft_failure(chat, cfg));
    }

    let route_open = store
        .update(chat, |s| {
            s.release_task(row);
            s.route_open()
        })
        .await
        .unwrap_or(false);
    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("task-declined", lang(cfg)),
        main_menu_keyboard(route_open, lang(cfg)),
    )])
}

/// Freeform comment on the active task; state returns to the task menu.
pub async fn handle_comment<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let Some(row) = session.current_row else {
        return Ok(reset_to_waiting(chat, store, cfg).await);
    };
    let Some(tasks) = gateway.tasks_sheet() else {
        return Ok(soft_failure(chat, cfg));
    };

    let existing = match gateway.read_cell(&tasks, row, task_col::COMMENT).await {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => {
            warn!(user_id = %chat, error = %e, "failed to read comment cell");
            return Ok(soft_failure(chat, cfg));
        }
    };
    let now = records::now_local(&cfg.tz);
    let comment = records::append_comment(
        &existing,
        &records::signed_comment(
            &session.driver_name,
            &records::timestamp_string(&now),
            text.trim(),
        ),
    );
    if let Err(e) = gateway
        .write_cell(&tasks, row, task_col::COMMENT, comment)
        .await
    {
        warn!(user_id = %chat, error = %e, "failed to append comment");
        return Ok(soft_failure(chat, cfg));
    }

    store.update(chat, |s| s.flow = FlowState::TaskMenu).await;
    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("comment-saved", lang(cfg)),
        task_menu_keyboard(lang(cfg)),
    )])
}

/// Reason for declining a sub-task slot: written straight into the slot's
/// status cell, independent of the primary task lifecycle.
pub async fn handle_subtask_reason<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    slot: usize,
    session: &Session,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    let (Some(row), Some((_, status_col))) =
        (session.current_row, task_col::SUBTASKS.get(slot).copied())
    else {
        return Ok(reset_to_waiting(chat, store, cfg).await);
    };
    let Some(tasks) = gateway.tasks_sheet() else {
        return Ok(soft_failure(chat, cfg));
    };

    let now = records::now_local(&cfg.tz);
    let value = records::signed_comment(
        &session.driver_name,
        &records::timestamp_string(&now),
        text.trim(),
    );
    if let Err(e) = gateway.write_cell(&tasks, row, status_col, value).await {
        warn!(user_id = %chat, error = %e, "failed to write sub-task decline");
        return Ok(soft_failure(chat, cfg));
    }

    store.update(chat, |s| s.flow = FlowState::TaskMenu).await;
    Ok(vec![Outgoing::with_markup(
        chat,
        t_lang("subtask-declined", lang(cfg)),
        task_menu_keyboard(lang(cfg)),
    )])
}
