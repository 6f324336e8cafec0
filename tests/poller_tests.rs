//! Polling loop tests: the at-most-once delivery invariant, driver
//! matching, failure tolerance and sub-task delivery.

mod common;

use common::{tasks_header, test_config, today, FakeSheets};
use teloxide::types::ChatId;

use fleetbot::bot::callback_handler::dispatch_callback;
use fleetbot::bot::Outgoing;
use fleetbot::config::BotConfig;
use fleetbot::dialogue::FlowState;
use fleetbot::gateway::SheetGateway;
use fleetbot::poller::{scan_subtasks, scan_tasks};
use fleetbot::records::{task_col, STATUS_IN_PROGRESS};
use fleetbot::session::{Session, SessionStore};

fn push_target(out: &Outgoing) -> ChatId {
    match out {
        Outgoing::Text { chat, .. } => *chat,
        Outgoing::Photo { chat, .. } => *chat,
    }
}

async fn world(api: FakeSheets) -> (SessionStore, SheetGateway<FakeSheets>, BotConfig) {
    let cfg = test_config();
    let gateway = SheetGateway::new(api, cfg.retry.clone());
    gateway
        .discover_functional_sheets()
        .await
        .expect("discovery");
    (SessionStore::new(), gateway, cfg)
}

fn tasks_sheet(rows: Vec<Vec<String>>) -> FakeSheets {
    let mut all = vec![tasks_header().iter().map(|s| s.to_string()).collect::<Vec<_>>()];
    all.extend(rows);
    let as_ref: Vec<Vec<&str>> = all
        .iter()
        .map(|r| r.iter().map(|c| c.as_str()).collect())
        .collect();
    FakeSheets::new().with_sheet("Tasks", as_ref)
}

fn task_row(date: &str, driver: &str, status: &str) -> Vec<String> {
    let mut row = vec![String::new(); 15];
    row[task_col::DATE - 1] = date.to_string();
    row[task_col::DRIVER - 1] = driver.to_string();
    row[task_col::MACHINE - 1] = "MAN-1".to_string();
    row[task_col::PLANNED - 1] = "09:00".to_string();
    row[task_col::STATUS - 1] = status.to_string();
    row
}

#[tokio::test]
async fn task_pushed_to_matching_chat_exactly_once() {
    let api = tasks_sheet(vec![task_row(&today(), "A", "")]);
    let (store, gateway, cfg) = world(api).await;

    let chat_a = ChatId(1);
    let chat_b = ChatId(2);
    store.create(chat_a, Session::new("A".to_string())).await;
    store.create(chat_b, Session::new("B".to_string())).await;

    let pushes = scan_tasks(&store, &gateway, &cfg).await;
    assert_eq!(pushes.len(), 1);
    assert_eq!(push_target(&pushes[0]), chat_a);

    let session_a = store.get(chat_a).await.unwrap();
    assert!(!session_a.waiting);
    assert_eq!(session_a.current_row, Some(2));
    assert!(session_a.sent_tasks.contains(&2));
    assert_eq!(session_a.flow, FlowState::AwaitingTaskDecision);

    // Chat B never matched and stays waiting
    let session_b = store.get(chat_b).await.unwrap();
    assert!(session_b.waiting);
    assert!(session_b.sent_tasks.is_empty());

    // A second scan with unchanged rows produces no duplicate push
    let pushes = scan_tasks(&store, &gateway, &cfg).await;
    assert!(pushes.is_empty());
}

#[tokio::test]
async fn rows_not_matching_today_or_status_are_skipped() {
    let api = tasks_sheet(vec![
        task_row("1999-01-01", "A", ""),
        task_row(&today(), "A", STATUS_IN_PROGRESS),
    ]);
    let (store, gateway, cfg) = world(api).await;
    store.create(ChatId(1), Session::new("A".to_string())).await;

    let pushes = scan_tasks(&store, &gateway, &cfg).await;
    assert!(pushes.is_empty());
    assert!(store.get(ChatId(1)).await.unwrap().waiting);
}

#[tokio::test]
async fn lowest_row_index_wins_and_only_one_push_per_scan() {
    let api = tasks_sheet(vec![
        task_row(&today(), "A", ""),
        task_row(&today(), "A", ""),
    ]);
    let (store, gateway, cfg) = world(api).await;
    store.create(ChatId(1), Session::new("A".to_string())).await;

    let pushes = scan_tasks(&store, &gateway, &cfg).await;
    assert_eq!(pushes.len(), 1);
    let session = store.get(ChatId(1)).await.unwrap();
    assert_eq!(session.current_row, Some(2));
    assert!(!session.sent_tasks.contains(&3));
}

#[tokio::test]
async fn unreachable_datastore_skips_scan_without_clearing_state() {
    let api = tasks_sheet(vec![task_row(&today(), "A", "")]);
    let handle = api.clone();
    let (store, gateway, cfg) = world(api).await;
    store.create(ChatId(1), Session::new("A".to_string())).await;

    handle.set_fail_all(true);
    let pushes = scan_tasks(&store, &gateway, &cfg).await;
    assert!(pushes.is_empty());

    let session = store.get(ChatId(1)).await.unwrap();
    assert!(session.waiting);
    assert!(session.sent_tasks.is_empty());
}

#[tokio::test]
async fn released_row_can_be_delivered_again() {
    let api = tasks_sheet(vec![task_row(&today(), "A", "")]);
    let (store, gateway, cfg) = world(api).await;
    let chat = ChatId(1);
    store.create(chat, Session::new("A".to_string())).await;

    assert_eq!(scan_tasks(&store, &gateway, &cfg).await.len(), 1);

    // Decline path clears the sent-set entry and the row stays open
    store.update(chat, |s| s.release_task(2)).await;

    let pushes = scan_tasks(&store, &gateway, &cfg).await;
    assert_eq!(pushes.len(), 1, "row must be re-deliverable after release");
}

#[tokio::test]
async fn chats_mid_workflow_are_not_pushed_to() {
    let api = tasks_sheet(vec![task_row(&today(), "A", "")]);
    let (store, gateway, cfg) = world(api).await;
    let chat = ChatId(1);
    let mut session = Session::new("A".to_string());
    session.flow = FlowState::AwaitingRefuelLiters;
    session.waiting = false;
    store.create(chat, session).await;

    assert!(scan_tasks(&store, &gateway, &cfg).await.is_empty());
}

fn in_progress_row_with_subtask(driver: &str, slot: usize) -> Vec<String> {
    let mut row = task_row(&today(), driver, STATUS_IN_PROGRESS);
    let (desc_col, _) = task_col::SUBTASKS[slot];
    row[desc_col - 1] = "Pick up spare parts".to_string();
    row
}

#[tokio::test]
async fn subtask_pushed_once_per_row_and_slot() {
    let api = tasks_sheet(vec![in_progress_row_with_subtask("A", 0)]);
    let (store, gateway, cfg) = world(api).await;
    let chat = ChatId(1);
    let mut session = Session::new("A".to_string());
    session.flow = FlowState::TaskMenu;
    session.waiting = false;
    session.current_row = Some(2);
    session.sent_tasks.insert(2);
    store.create(chat, session).await;

    let pushes = scan_subtasks(&store, &gateway, &cfg).await;
    assert_eq!(pushes.len(), 1);
    assert_eq!(push_target(&pushes[0]), chat);
    assert!(store
        .get(chat)
        .await
        .unwrap()
        .sent_subtasks
        .contains(&(2, 0)));

    // Same row+slot is never pushed twice
    assert!(scan_subtasks(&store, &gateway, &cfg).await.is_empty());
}

#[tokio::test]
async fn subtasks_ignored_until_primary_is_in_progress() {
    let mut row = task_row(&today(), "A", "");
    row[task_col::SUBTASKS[0].0 - 1] = "Pick up spare parts".to_string();
    let api = tasks_sheet(vec![row]);
    let (store, gateway, cfg) = world(api).await;
    let mut session = Session::new("A".to_string());
    session.current_row = Some(2);
    session.waiting = false;
    store.create(ChatId(1), session).await;

    assert!(scan_subtasks(&store, &gateway, &cfg).await.is_empty());
}

#[tokio::test]
async fn subtask_accept_writes_acknowledgement() {
    let api = tasks_sheet(vec![in_progress_row_with_subtask("A", 1)]);
    let handle = api.clone();
    let (store, gateway, cfg) = world(api).await;
    let chat = ChatId(1);
    let mut session = Session::new("A".to_string());
    session.flow = FlowState::TaskMenu;
    session.waiting = false;
    session.current_row = Some(2);
    store.create(chat, session).await;

    assert_eq!(scan_subtasks(&store, &gateway, &cfg).await.len(), 1);

    dispatch_callback(chat, "sub_accept:2:1", &store, &gateway, &cfg)
        .await
        .unwrap();
    let (_, status_col) = task_col::SUBTASKS[1];
    let ack = handle.cell("Tasks", 2, status_col);
    assert!(ack.starts_with("A ("), "ack was {ack:?}");

    // Slot with an acknowledgement is no longer offered
    assert!(scan_subtasks(&store, &gateway, &cfg).await.is_empty());
}

#[tokio::test]
async fn subtask_decline_records_signed_reason() {
    let api = tasks_sheet(vec![in_progress_row_with_subtask("A", 2)]);
    let handle = api.clone();
    let (store, gateway, cfg) = world(api).await;
    let chat = ChatId(1);
    let mut session = Session::new("A".to_string());
    session.flow = FlowState::TaskMenu;
    session.waiting = false;
    session.current_row = Some(2);
    store.create(chat, session).await;

    dispatch_callback(chat, "sub_decline:2:2", &store, &gateway, &cfg)
        .await
        .unwrap();
    assert_eq!(
        store.get(chat).await.unwrap().flow,
        FlowState::AwaitingSubtaskReason { slot: 2 }
    );

    fleetbot::bot::message_handler::dispatch_text(chat, "no time today", &store, &gateway, &cfg)
        .await
        .unwrap();
    let (_, status_col) = task_col::SUBTASKS[2];
    let status = handle.cell("Tasks", 2, status_col);
    assert!(status.starts_with("A ("), "status was {status:?}");
    assert!(status.ends_with("): no time today"), "status was {status:?}");
    assert_eq!(store.get(chat).await.unwrap().flow, FlowState::TaskMenu);
}
