mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use krushr_proto::{TaskId, UserId, WorkspaceId};
use krushr_realtime::telemetry::{self, LogConfig};
use krushr_realtime::{CommentThread, RealtimeConfig, RealtimeSession, SortOrder};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use cli::{Cli, Command, CommentsArgs, TailArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = RealtimeConfig::try_from_env().context("invalid KRUSHR_* configuration")?;
    telemetry::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone().or_else(|| config.log_file()),
    })?;

    let session = RealtimeSession::from_config(&config);
    let user = UserId::new(cli.user);
    match cli.command {
        Command::Tail(args) => tail(&session, user, args).await,
        Command::Comments(args) => comments(&session, user, args).await,
    }
}

async fn tail(session: &RealtimeSession, user: UserId, args: TailArgs) -> Result<()> {
    let mut events = session.events();
    let mut status = session.connection().watch_status();
    // Held for the lifetime of the command so the rooms stay joined.
    let _rooms: Vec<_> = args
        .tasks
        .into_iter()
        .map(|task| session.subscribe_task(TaskId::new(task)))
        .chain(
            args.workspaces
                .into_iter()
                .map(|workspace| session.subscribe_workspace(WorkspaceId::new(workspace))),
        )
        .collect();

    session.login(user);
    info!(target: "krushr_sync", url = %session.connection().url(), "tailing events");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(target: "krushr_sync", status = ?current, "connection status");
            }
            event = events.recv() => match event {
                Ok(event) => {
                    info!(target: "krushr_sync", event = event.kind().as_str(), payload = ?event, "event");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: "krushr_sync", skipped, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    session.logout();
    Ok(())
}

async fn comments(session: &RealtimeSession, user: UserId, args: CommentsArgs) -> Result<()> {
    let task = TaskId::new(args.task);
    let order = SortOrder::from(args.order);
    let mut updates = args.follow.then(|| session.subscribe_task(task.clone()));
    session.login(user);

    session
        .load_comments(&task)
        .await
        .with_context(|| format!("loading comments for task {task}"))?;
    print_threads(session, &session.threaded_comments(&task, order));

    let Some(updates) = updates.as_mut() else {
        session.logout();
        return Ok(());
    };
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Some(update) => {
                    info!(target: "krushr_sync", event = update.event.kind().as_str(), "thread changed");
                    print_threads(session, &session.threaded_comments(&task, order));
                }
                None => break,
            },
        }
    }
    session.logout();
    Ok(())
}

fn print_threads(session: &RealtimeSession, threads: &[CommentThread]) {
    println!("--- {} thread(s)", threads.len());
    for thread in threads {
        print_comment(session, &thread.comment, 0);
        for reply in &thread.replies {
            print_comment(session, reply, 1);
        }
    }
}

fn print_comment(session: &RealtimeSession, comment: &krushr_proto::Comment, depth: usize) {
    let indent = "    ".repeat(depth);
    let body = if comment.is_deleted {
        "[deleted]"
    } else {
        comment.content.as_str()
    };
    let edited = if comment.is_edited { " (edited)" } else { "" };
    println!("{indent}[{}] {}: {body}{edited}", comment.id, comment.author_id);
    let reactions: Vec<String> = session
        .reactions(&comment.id)
        .into_iter()
        .map(|summary| format!("{} {}", summary.emoji, summary.count))
        .collect();
    if !reactions.is_empty() {
        println!("{indent}    {}", reactions.join("  "));
    }
}
