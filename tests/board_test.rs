use std::sync::Arc;
use task_board_sync::board::{BoardView, BoardViewModel, DialogResult, Operation};
use task_board_sync::config::BoardConfig;
use task_board_sync::store::memory::{MemoryStore, StoreOp};
use task_board_sync::store::StoreError;
use task_board_sync::task::{ListId, Task, TaskFields};
use task_board_sync::BoardError;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration};

async fn open_with(store: &Arc<MemoryStore>) -> BoardViewModel {
    BoardViewModel::open(store.clone(), &BoardConfig::default())
        .await
        .unwrap()
}

async fn wait_for_view<F>(rx: &mut watch::Receiver<BoardView>, predicate: F) -> BoardView
where
    F: FnMut(&BoardView) -> bool,
{
    timeout(Duration::from_secs(2), rx.wait_for(predicate))
        .await
        .expect("board view did not settle")
        .expect("render task stopped")
        .clone()
}

#[tokio::test]
async fn test_move_is_shown_before_confirmation() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(ListId::Backlog, "1", &TaskFields::new("Buy milk", ""))
        .await
        .unwrap();
    let board = open_with(&store).await;
    let milk = Task::new("Buy milk", "").with_id("1");
    assert_eq!(board.visible(ListId::Backlog).await.unwrap(), vec![milk.clone()]);

    let mut rx = board.watch();
    let gate = store.hold_writes();

    let drag = board.submit_drag(&milk, ListId::Backlog, ListId::Done, false);
    let check = async {
        let optimistic = wait_for_view(&mut rx, |v| v.backlog.is_empty() && !v.done.is_empty()).await;
        assert_eq!(optimistic.done, vec![milk.clone()]);
        assert!(optimistic.in_progress.is_empty());

        // still unconfirmed remotely
        assert_eq!(store.documents(ListId::Backlog).await.len(), 1);
        gate.release();
    };
    tokio::join!(drag, check);

    let confirmed = wait_for_view(&mut rx, |v| {
        v.backlog.is_empty() && v.done.len() == 1 && v.done[0].id.as_deref() != Some("1")
    })
    .await;

    let server_id = store.documents(ListId::Done).await[0].id.clone();
    assert_eq!(confirmed.done[0].title, "Buy milk");
    assert_eq!(confirmed.done[0].id, server_id);
    assert!(board.coordinator().overlay().active().await.is_empty());
}

#[tokio::test]
async fn test_failed_move_reverts_to_confirmed_state() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(ListId::InProgress, "a", &TaskFields::new("Write docs", ""))
        .await
        .unwrap();
    store
        .seed(ListId::Done, "b", &TaskFields::new("Ship v1", ""))
        .await
        .unwrap();
    let board = open_with(&store).await;
    let mut errors = board.take_errors().unwrap();
    let before = board.view().await.unwrap();

    store.fail_next(
        StoreOp::AtomicMove,
        StoreError::Aborted("contention".to_string()),
    );
    let docs = Task::new("Write docs", "").with_id("a");
    board
        .submit_drag(&docs, ListId::InProgress, ListId::Done, false)
        .await;

    let failure = errors.try_recv().unwrap();
    assert_eq!(failure.operation, Operation::Move);
    assert!(matches!(
        failure.error,
        BoardError::Store(StoreError::Aborted(_))
    ));

    assert_eq!(board.view().await.unwrap(), before);
    assert!(board.coordinator().overlay().active().await.is_empty());
}

#[tokio::test]
async fn test_blank_new_task_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let board = open_with(&store).await;
    let mut errors = board.take_errors().unwrap();

    board.submit_new_task("", "anything").await;

    assert!(board.visible(ListId::Backlog).await.unwrap().is_empty());
    assert!(store.documents(ListId::Backlog).await.is_empty());
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn test_new_task_appears_in_backlog() {
    let store = Arc::new(MemoryStore::new());
    let board = open_with(&store).await;
    let mut rx = board.watch();

    board.submit_new_task("Buy milk", "2l").await;

    let view = wait_for_view(&mut rx, |v| v.backlog.len() == 1).await;
    assert_eq!(view.backlog[0].title, "Buy milk");
    assert_eq!(view.backlog[0].description, "2l");
    assert!(view.backlog[0].id.is_some());
}

#[tokio::test]
async fn test_within_list_drag_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(ListId::Backlog, "1", &TaskFields::new("Buy milk", ""))
        .await
        .unwrap();
    store
        .seed(ListId::Backlog, "2", &TaskFields::new("Walk dog", ""))
        .await
        .unwrap();
    let board = open_with(&store).await;
    let before = board.view().await.unwrap();
    // any remote call would hit this
    store.fail_next(StoreOp::AtomicMove, StoreError::Unavailable("x".to_string()));

    let dog = Task::new("Walk dog", "").with_id("2");
    board
        .submit_drag(&dog, ListId::Backlog, ListId::Backlog, true)
        .await;

    assert_eq!(board.view().await.unwrap(), before);
    assert!(board.coordinator().overlay().active().await.is_empty());
    assert_eq!(store.documents(ListId::Backlog).await, before.backlog);
}

#[tokio::test]
async fn test_edit_missing_task_is_not_surfaced() {
    let store = Arc::new(MemoryStore::new());
    let board = open_with(&store).await;
    let mut errors = board.take_errors().unwrap();
    let before = board.visible(ListId::Done).await.unwrap();

    board
        .submit_edit(ListId::Done, "missingId", "x", "")
        .await;
    board.submit_delete(ListId::Done, "missingId").await;

    assert!(errors.try_recv().is_err());
    assert_eq!(board.visible(ListId::Done).await.unwrap(), before);
}

#[tokio::test]
async fn test_unavailable_store_is_surfaced() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(ListId::Backlog, "1", &TaskFields::new("Buy milk", ""))
        .await
        .unwrap();
    let board = open_with(&store).await;
    let mut errors = board.take_errors().unwrap();

    store.fail_next(StoreOp::Update, StoreError::Unavailable("offline".to_string()));
    board
        .submit_edit(ListId::Backlog, "1", "Buy oat milk", "")
        .await;

    let failure = errors.try_recv().unwrap();
    assert_eq!(failure.operation, Operation::Update);
    assert!(matches!(
        failure.error,
        BoardError::Store(StoreError::Unavailable(_))
    ));
    assert_eq!(board.visible(ListId::Backlog).await.unwrap()[0].title, "Buy milk");
}

#[tokio::test]
async fn test_edit_without_id_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let board = open_with(&store).await;
    let mut errors = board.take_errors().unwrap();

    board.submit_edit(ListId::Backlog, "", "Title", "").await;

    let failure = errors.try_recv().unwrap();
    assert_eq!(failure.operation, Operation::Update);
    assert!(matches!(failure.error, BoardError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_dialog_result_routes_to_edit_or_delete() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(ListId::InProgress, "7", &TaskFields::new("Write docs", ""))
        .await
        .unwrap();
    let board = open_with(&store).await;
    let mut rx = board.watch();

    let edited = Task::new("Write docs", "with examples").with_id("7");
    board
        .submit_dialog_result(
            ListId::InProgress,
            DialogResult {
                task: edited.clone(),
                delete: false,
            },
        )
        .await;
    let view = wait_for_view(&mut rx, |v| v.in_progress == vec![edited.clone()]).await;
    assert_eq!(view.in_progress[0].description, "with examples");

    board
        .submit_dialog_result(
            ListId::InProgress,
            DialogResult {
                task: edited,
                delete: true,
            },
        )
        .await;
    wait_for_view(&mut rx, |v| v.in_progress.is_empty()).await;
    assert!(store.documents(ListId::InProgress).await.is_empty());
}

#[tokio::test]
async fn test_remote_changes_from_other_clients_show_up() {
    let store = Arc::new(MemoryStore::new());
    let board = open_with(&store).await;
    let mut rx = board.watch();

    // another client writing directly to the store
    store
        .seed(ListId::Done, "x", &TaskFields::new("Done elsewhere", ""))
        .await
        .unwrap();

    let view = wait_for_view(&mut rx, |v| v.done.len() == 1).await;
    assert_eq!(view.titles(ListId::Done), vec!["Done elsewhere"]);
}

#[tokio::test]
async fn test_shutdown_releases_subscriptions_once() {
    let store = Arc::new(MemoryStore::new());
    let mut board = open_with(&store).await;
    for list in ListId::ALL {
        assert_eq!(store.active_subscriptions(list), 1);
    }

    board.shutdown(Duration::from_secs(2)).await.unwrap();
    board.shutdown(Duration::from_secs(2)).await.unwrap();

    for list in ListId::ALL {
        assert_eq!(store.active_subscriptions(list), 0);
    }
    assert!(board.is_torn_down());
}

#[tokio::test]
async fn test_drop_releases_subscriptions() {
    let store = Arc::new(MemoryStore::new());
    let board = open_with(&store).await;

    drop(board);

    for list in ListId::ALL {
        assert_eq!(store.active_subscriptions(list), 0);
    }
}

#[tokio::test]
async fn test_shutdown_with_move_in_flight() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(ListId::Backlog, "1", &TaskFields::new("Buy milk", ""))
        .await
        .unwrap();
    let mut board = open_with(&store).await;
    let milk = Task::new("Buy milk", "").with_id("1");
    let gate = store.hold_writes();

    // the caller gives up; the transaction keeps running
    let abandoned = timeout(
        Duration::from_millis(50),
        board.submit_drag(&milk, ListId::Backlog, ListId::Done, false),
    )
    .await;
    assert!(abandoned.is_err());

    board.shutdown(Duration::from_secs(2)).await.unwrap();
    gate.release();

    for _ in 0..100 {
        if store.documents(ListId::Done).await.len() == 1 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.documents(ListId::Done).await.len(), 1);
    assert!(store.documents(ListId::Backlog).await.is_empty());
    assert!(board.coordinator().overlay().is_disposed().await);
    assert!(board.coordinator().overlay().active().await.is_empty());
}

#[tokio::test]
async fn test_submissions_after_shutdown_are_ignored() {
    let store = Arc::new(MemoryStore::new());
    let mut board = open_with(&store).await;
    board.shutdown(Duration::from_secs(2)).await.unwrap();

    board.submit_new_task("Too late", "").await;

    assert!(store.documents(ListId::Backlog).await.is_empty());
}

#[tokio::test]
async fn test_lists_subscribe_on_first_read() {
    let store = Arc::new(MemoryStore::new());
    let board = BoardViewModel::new(store.clone(), &BoardConfig::default());
    for list in ListId::ALL {
        assert_eq!(store.active_subscriptions(list), 0);
    }

    board.visible(ListId::Done).await.unwrap();

    assert_eq!(store.active_subscriptions(ListId::Done), 1);
    assert_eq!(store.active_subscriptions(ListId::Backlog), 0);
    assert_eq!(store.active_subscriptions(ListId::InProgress), 0);
}

#[tokio::test]
async fn test_committed_move_is_confirmed_when_drag_returns() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(ListId::Backlog, "1", &TaskFields::new("Buy milk", ""))
        .await
        .unwrap();
    let board = open_with(&store).await;
    let milk = Task::new("Buy milk", "").with_id("1");

    board
        .submit_drag(&milk, ListId::Backlog, ListId::Done, false)
        .await;

    // the intent is only retired once both feeds show the commit
    assert!(board.coordinator().overlay().active().await.is_empty());
    assert!(board.cache(ListId::Backlog).current().is_empty());
    let server_id = store.documents(ListId::Done).await[0].id.clone().unwrap();
    assert!(board.cache(ListId::Done).current().contains_id(&server_id));

    let view = board.view().await.unwrap();
    assert!(view.backlog.is_empty());
    assert_eq!(view.done, vec![Task::new("Buy milk", "").with_id(server_id)]);
}

#[tokio::test]
async fn test_view_shows_in_flight_task_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(ListId::Backlog, "1", &TaskFields::new("Buy milk", ""))
        .await
        .unwrap();
    let board = open_with(&store).await;
    let milk = Task::new("Buy milk", "").with_id("1");
    let gate = store.hold_writes();
    let mut overlay_rx = board.coordinator().overlay().watch();

    let drag = board.submit_drag(&milk, ListId::Backlog, ListId::InProgress, false);
    let check = async {
        overlay_rx.changed().await.unwrap();

        let view = board.view().await.unwrap();
        let shown: usize = ListId::ALL.iter().map(|l| view.titles(*l).len()).sum();
        assert_eq!(shown, 1);
        assert_eq!(view.in_progress, vec![milk.clone()]);

        gate.release();
    };
    tokio::join!(drag, check);

    let view = board.view().await.unwrap();
    assert_eq!(view.titles(ListId::InProgress), vec!["Buy milk"]);
    assert!(view.backlog.is_empty());
}
