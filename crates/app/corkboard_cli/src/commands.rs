//! Command handlers.
//!
//! Every command except `version` and `demo` restores the remembered
//! session first, so `list` and friends work after a previous `login`.

use std::sync::Arc;

use corkboard_core::backend::memory::MemoryBackend;
use corkboard_core::board::Board;
use corkboard_core::config::ClientConfig;
use corkboard_core::models::Comment;
use corkboard_core::storage::MemoryStore;

use crate::cli::Commands;
use crate::{Error, Result};

pub async fn execute(command: Commands) -> Result<()> {
    match command {
        Commands::Version => {
            println!(
                "{} {} (core {})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                corkboard_core::version()
            );
            Ok(())
        }
        Commands::Demo => demo().await,
        command => {
            let board = connect().await?;
            run_against(&board, command).await
        }
    }
}

async fn connect() -> Result<Board> {
    let config = ClientConfig::from_env()?;
    config.validate()?;
    let board = Board::from_config(&config)?;
    board.start().await;
    Ok(board)
}

async fn run_against(board: &Board, command: Commands) -> Result<()> {
    match command {
        Commands::Register { email, password } => {
            let identity = board.register(&email, &password).await?;
            println!("Registered {} ({}). Run `login` to sign in.", identity.email, identity.user_id);
        }
        Commands::Login { email, password } => {
            let identity = board.sign_in(&email, &password).await?;
            println!("Signed in as {}", identity.email);
        }
        Commands::Logout => {
            board.sign_out().await;
            println!("Signed out");
        }
        Commands::Whoami => match board.session().user_email() {
            Some(email) => println!("{email}"),
            None => println!("Not signed in"),
        },
        Commands::List => {
            let comments = board.refresh().await?;
            print_comments(board, &comments);
        }
        Commands::Post { text } => {
            let id = board.post(&text).await?;
            println!("Posted {id}");
        }
        Commands::Edit { id, text } => {
            board.edit(&id, &text).await?;
            println!("Updated {id}");
        }
        Commands::Delete { id } => {
            board.remove(&id).await?;
            println!("Deleted {id}");
        }
        Commands::Version | Commands::Demo => {
            return Err(Error::Custom("command does not use the hosted backend".into()));
        }
    }
    Ok(())
}

fn print_comments(board: &Board, comments: &[Comment]) {
    if comments.is_empty() {
        println!("No comments yet");
        return;
    }
    for comment in comments {
        let mark = if board.can_modify(comment) { '*' } else { ' ' };
        println!(
            "{mark} {}  {}  {}",
            comment.id,
            comment.created_at.format("%Y-%m-%d %H:%M"),
            comment.author_email
        );
        println!("    {}", comment.text);
    }
}

async fn demo() -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let board = Board::with_backend(backend, Arc::new(MemoryStore::new()), &ClientConfig::default());
    board.start().await;

    for email in ["alice@example.com", "bob@example.com"] {
        let identity = board.register(email, "secret1").await?;
        println!("registered {} as {}", identity.email, identity.user_id);
    }

    board.sign_in("alice@example.com", "secret1").await?;
    println!("signed in as alice@example.com");
    let first = board.post("First!").await?;
    let typo = board.post("Anyone arund?").await?;
    board.edit(&first, "First! (edited)").await?;
    board.remove(&typo).await?;
    println!("posted, edited and deleted as alice");
    board.sign_out().await;

    board.sign_in("bob@example.com", "secret1").await?;
    println!("signed in as bob@example.com");
    board.post("Hi Alice").await?;
    let comments = board.refresh().await?;
    print_comments(&board, &comments);

    match board.remove(&first).await {
        Err(e) => println!("deleting alice's comment: {}", e.user_message()),
        Ok(()) => return Err(Error::Custom("ownership check did not apply".into())),
    }
    board.sign_out().await;

    println!("demo complete");
    Ok(())
}
