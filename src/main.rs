use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pubsub_client::{
    ApiError, ClientConfig, ClientSessionController, ControllerError, FileStore, HttpApi, Message, User, ViewEvent,
};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tokio::sync::broadcast::error::RecvError;

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("polling stopped: {0}")]
    PollingStopped(String),
    #[error("failed to listen for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "pubsub-client", about = "Pub/Sub messaging client")]
struct Cli {
    #[arg(long, env = "PUBSUB_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "PUBSUB_STORE_PATH", help = "File holding the local session store")]
    store_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the backend and print the feed as it changes.
    Watch {
        #[arg(long, help = "Seconds between poll cycles")]
        interval: Option<u64>,
    },
    /// Print the current message feed once.
    Messages,
    /// Print all known users once.
    Users,
    /// Create a user and store it as the session.
    Register {
        name: String,
        #[arg(long)]
        avatar: Option<String>,
    },
    /// Validate and print the stored session.
    Whoami,
    /// Publish a message as the stored session, or anonymously.
    Send { text: String },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_owned();
    }
    if let Some(store_path) = cli.store_path {
        config.store_path = store_path;
    }
    if let Command::Watch { interval: Some(interval) } = cli.command {
        config.poll_interval_secs = interval;
    }

    let api = Arc::new(HttpApi::from_config(&config)?);
    let store = Arc::new(FileStore::new(config.store_path.clone()));
    tracing::debug!(base_url = %config.base_url, store = %store.path().display(), "client configured");
    let controller = ClientSessionController::new(api, store, config);

    match cli.command {
        Command::Watch { .. } => run_watch(&controller).await,
        Command::Messages => {
            controller.fetch_messages().await?;
            print_messages(&controller.snapshot().messages);
            Ok(())
        }
        Command::Users => {
            controller.fetch_all_users().await?;
            let snapshot = controller.snapshot();
            print_users(&snapshot.users, snapshot.user_count);
            Ok(())
        }
        Command::Register { name, avatar } => {
            let user = controller.create_user(&name, avatar.as_deref()).await?;
            println!("registered {} ({})", user.name, user.user_id);
            Ok(())
        }
        Command::Whoami => {
            match controller.restore_session().await? {
                Some(user) => println!("{} ({})", user.name, user.user_id),
                None => println!("anonymous"),
            }
            Ok(())
        }
        Command::Send { text } => {
            controller.send_message(&text).await?;
            println!("sent");
            Ok(())
        }
    }
}

async fn run_watch(controller: &ClientSessionController) -> Result<(), CliError> {
    let mut events = controller.subscribe();
    controller.initialize().await;

    let mut rendered: Vec<Message> = Vec::new();
    let mut rendered_users: Vec<User> = Vec::new();
    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
            event = events.recv() => match event {
                Ok(ViewEvent::MessagesUpdated { .. }) => {
                    let messages = controller.snapshot().messages;
                    if messages != rendered {
                        print_messages(&messages);
                        rendered = messages;
                    }
                }
                Ok(ViewEvent::UsersUpdated { count }) => {
                    let users = controller.snapshot().users;
                    if users != rendered_users {
                        print_users(&users, count);
                        rendered_users = users;
                    }
                }
                Ok(ViewEvent::Identified(user)) => eprintln!("identified as {} ({})", user.name, user.user_id),
                Ok(ViewEvent::SessionCleared) => eprintln!("stored session is no longer valid; posting anonymously"),
                Ok(ViewEvent::Notice(notice)) => break Err(CliError::PollingStopped(notice)),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "view events lagged"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    controller.shutdown().await;
    result
}

fn print_messages(messages: &[Message]) {
    println!("--- {} messages ---", messages.len());
    for message in messages {
        let created = message
            .created
            .and_then(|created| created.format(TIMESTAMP_FORMAT).ok())
            .unwrap_or_else(|| "-".to_owned());
        println!("[{created}] {}: {}", message.username, message.text);
    }
}

fn print_users(users: &[User], count: usize) {
    println!("--- {count} users ---");
    for user in users {
        match &user.avatar {
            Some(avatar) => println!("{} ({}) {avatar}", user.name, user.user_id),
            None => println!("{} ({})", user.name, user.user_id),
        }
    }
}
