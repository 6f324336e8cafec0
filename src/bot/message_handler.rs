//! Message Handler module for processing incoming Telegram messages
//!
//! Converts inbound updates into events, routes them through the per-chat
//! state machine and sends whatever the handlers produced. Handler errors
//! are caught here: they are logged and answered with a generic retry
//! message, never allowed to crash the process.

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use tracing::{debug, error};

use crate::config::BotConfig;
use crate::dialogue::FlowState;
use crate::gateway::SheetGateway;
use crate::localization::t_lang;
use crate::session::SessionStore;
use crate::sheets::SheetsApi;

use super::dialogue_manager::{
    handle_branch, handle_comment, handle_decline_reason, handle_end_odometer, handle_eta,
    handle_invite_code, handle_machine_choice, handle_menu_choice, handle_name,
    handle_parcel_action, handle_parcel_count, handle_photo, handle_refuel_liters,
    handle_refuel_odometer, handle_start, handle_start_odometer, handle_subtask_reason,
    handle_task_menu,
};
use super::ui_builder::Outgoing;

/// Route one text message through the state machine.
pub async fn dispatch_text<A: SheetsApi>(
    chat: ChatId,
    text: &str,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    if text.trim() == "/start" {
        return handle_start(chat, store, cfg).await;
    }

    // Unvetted traffic gets no response at all
    let Some(session) = store.get(chat).await else {
        debug!(user_id = %chat, "ignoring message from unknown chat");
        return Ok(vec![]);
    };

    match session.flow.clone() {
        FlowState::Start => Ok(vec![]),
        FlowState::AwaitingInviteCode => handle_invite_code(chat, text, store, cfg).await,
        FlowState::AwaitingName => handle_name(chat, text, store, gateway, cfg).await,
        FlowState::Idle => handle_menu_choice(chat, text, &session, store, gateway, cfg).await,
        FlowState::ChoosingMachine => {
            handle_machine_choice(chat, text, &session, store, cfg).await
        }
        FlowState::AwaitingStartOdometer => {
            handle_start_odometer(chat, text, &session, store, gateway, cfg).await
        }
        FlowState::AwaitingRefuelOdometer => {
            handle_refuel_odometer(chat, text, store, cfg).await
        }
        FlowState::AwaitingRefuelLiters => {
            handle_refuel_liters(chat, text, &session, store, gateway, cfg).await
        }
        FlowState::AwaitingEndOdometer => {
            handle_end_odometer(chat, text, &session, store, gateway, cfg).await
        }
        FlowState::AwaitingBranch => handle_branch(chat, text, store, cfg).await,
        FlowState::AwaitingParcelAction => {
            handle_parcel_action(chat, text, &session, store, cfg).await
        }
        FlowState::AwaitingReceiveCount => {
            handle_parcel_count(chat, text, true, store, cfg).await
        }
        FlowState::AwaitingSendCount => {
            handle_parcel_count(chat, text, false, store, cfg).await
        }
        FlowState::AwaitingPhoto(kind) => {
            // A photo is pending; repeat the request instead of guessing
            let key = match kind {
                crate::dialogue::PhotoKind::StartOdometer => "prompt-photo-odometer",
                crate::dialogue::PhotoKind::EndOdometer => "prompt-photo-end-odometer",
                crate::dialogue::PhotoKind::Refuel => "prompt-photo-refuel",
                crate::dialogue::PhotoKind::ParcelReceive
                | crate::dialogue::PhotoKind::ParcelSend => "prompt-photo-parcels",
            };
            Ok(vec![Outgoing::text(
                chat,
                t_lang(key, Some(cfg.locale.as_str())),
            )])
        }
        FlowState::AwaitingTaskDecision => Ok(vec![Outgoing::text(
            chat,
            t_lang("use-buttons", Some(cfg.locale.as_str())),
        )]),
        FlowState::AwaitingEta => handle_eta(chat, text, &session, store, gateway, cfg).await,
        FlowState::TaskMenu => handle_task_menu(chat, text, &session, store, gateway, cfg).await,
        FlowState::AwaitingDeclineReason { full_clear } => {
            handle_decline_reason(chat, text, full_clear, &session, store, gateway, cfg).await
        }
        FlowState::AwaitingComment => {
            handle_comment(chat, text, &session, store, gateway, cfg).await
        }
        FlowState::AwaitingSubtaskReason { slot } => {
            handle_subtask_reason(chat, text, slot, &session, store, gateway, cfg).await
        }
    }
}

/// Route one message (text or photo) and produce the outbound replies.
pub async fn dispatch_message<A: SheetsApi>(
    msg: &Message,
    store: &SessionStore,
    gateway: &SheetGateway<A>,
    cfg: &BotConfig,
) -> Result<Vec<Outgoing>> {
    if let Some(text) = msg.text() {
        debug!(user_id = %msg.chat.id, "received text message");
        return dispatch_text(msg.chat.id, text, store, gateway, cfg).await;
    }
    if let Some(photos) = msg.photo() {
        debug!(user_id = %msg.chat.id, "received photo message");
        if let Some(largest_photo) = photos.last() {
            return handle_photo(msg.chat.id, largest_photo.file.id.clone(), store, cfg).await;
        }
    }
    // Other attachment kinds carry nothing the workflows use
    Ok(vec![])
}

/// Send every outbound message produced by a dispatch pass.
pub async fn send_all(bot: &Bot, outgoing: Vec<Outgoing>) -> Result<()> {
    for out in outgoing {
        match out {
            Outgoing::Text { chat, text, markup } => {
                let request = bot.send_message(chat, text);
                match markup {
                    Some(m) => request.reply_markup(m).await?,
                    None => request.await?,
                };
            }
            Outgoing::Photo { chat, file, caption } => {
                bot.send_photo(chat, InputFile::file_id(file))
                    .caption(caption)
                    .await?;
            }
        }
    }
    Ok(())
}

/// Endpoint wired into the dispatcher for message updates.
pub async fn message_handler<A: SheetsApi>(
    bot: Bot,
    msg: Message,
    store: SessionStore,
    gateway: Arc<SheetGateway<A>>,
    cfg: Arc<BotConfig>,
) -> Result<()> {
    match dispatch_message(&msg, &store, &gateway, &cfg).await {
        Ok(replies) => send_all(&bot, replies).await?,
        Err(e) => {
            error!(user_id = %msg.chat.id, error = %e, "message handler failed");
            bot.send_message(msg.chat.id, t_lang("error-generic", Some(cfg.locale.as_str())))
                .await?;
        }
    }
    Ok(())
}
