//! Demo run used by the binary: seed the backlog, drag one task into
//! progress, log the resulting board and shut down.

use crate::board::{BoardView, BoardViewModel};
use crate::config::BoardConfig;
use crate::store::RemoteStore;
use crate::task::{starter_tasks, ListId};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{info, warn};

/// Drive one board session against `store` and return the final view
pub async fn run(store: Arc<dyn RemoteStore>, config: &BoardConfig) -> crate::Result<BoardView> {
    let mut board = BoardViewModel::open(store, config).await?;
    let mut errors = board.take_errors();

    if config.seed_demo_tasks {
        for fields in starter_tasks() {
            board
                .submit_new_task(&fields.title, &fields.description)
                .await;
        }

        let mut live = board.watch();
        match timeout(
            config.operation_timeout(),
            live.wait_for(|v| !v.backlog.is_empty()),
        )
        .await
        {
            Ok(Ok(_)) => {}
            _ => warn!("Starter tasks did not reach the board in time"),
        };
    }

    match board.visible(ListId::Backlog).await?.into_iter().next() {
        Some(task) => {
            info!("Moving '{}' to {}", task.title, ListId::InProgress);
            board
                .submit_drag(&task, ListId::Backlog, ListId::InProgress, false)
                .await;
        }
        None => info!("Backlog is empty, nothing to move"),
    }

    let view = board.view().await?;
    for list in ListId::ALL {
        info!("{}: {:?}", list, view.titles(list));
    }

    if let Some(errors) = errors.as_mut() {
        while let Ok(failure) = errors.try_recv() {
            warn!("{:?} failed: {}", failure.operation, failure.error);
        }
    }

    board.shutdown(config.shutdown_timeout()).await?;
    Ok(view)
}
