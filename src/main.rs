mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands, PostArgs, PostsCommand, ProfileCommand, RegisterArgs};
use quill_lib::api::{PostDraft, ProfileUpdate, Registration, Upload};
use quill_lib::{commands, AuthEvent, ClientState, ConfigManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    // Initialize the tracing subscriber for structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "quill_lib=debug,quill=debug,warn".into()
            } else {
                "quill_lib=info,quill=info,warn".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();

    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::load_from(path).await,
        None => ConfigManager::new().await,
    }
    .context("failed to load configuration")?;
    debug!(path = %config_manager.path().display(), "Configuration loaded");

    let state = ClientState::new(config_manager.get_config().await)
        .context("failed to initialize client")?;

    let result = run(&state, cli.command).await;
    state.shutdown();
    result
}

async fn run(state: &ClientState, command: Commands) -> Result<()> {
    match command {
        Commands::Login { username, password } => {
            let identity = commands::login(state, &username, &password).await?;
            println!("Logged in as {}", identity.username);
        }
        Commands::Logout => {
            commands::logout(state).await?;
            println!("Logged out");
        }
        Commands::Register(args) => {
            let registration = registration_from(args).await?;
            let user = commands::register(state, &registration).await?;
            println!("Registered {}. You can now log in.", user.username);
        }
        Commands::Whoami => match commands::whoami(state).await {
            Some(identity) => print_json(&identity)?,
            None => println!("Not logged in"),
        },
        Commands::Posts(command) => run_posts(state, command).await?,
        Commands::Profile(command) => run_profile(state, command).await?,
        Commands::Keepalive => keepalive(state).await?,
    }
    Ok(())
}

async fn run_posts(state: &ClientState, command: PostsCommand) -> Result<()> {
    match command {
        PostsCommand::List { page, per_page } => {
            let page = commands::list_posts(state, page, per_page).await?;
            for post in &page.items {
                let author = post.author_username.as_deref().unwrap_or("unknown");
                println!("#{:<5} {} (by {})", post.id, post.title, author);
            }
            println!("page {} of {} ({} posts)", page.page, page.total_pages, page.total_items);
        }
        PostsCommand::Show { id } => {
            let post = commands::show_post(state, id).await?;
            print_json(&post)?;
            if let Some(image) = &post.image {
                println!("image: {}", state.api().media_url(image)?);
            }
        }
        PostsCommand::Create(args) => {
            let draft = draft_from(args).await?;
            let post = commands::create_post(state, &draft).await?;
            println!("Created post #{}", post.id);
        }
        PostsCommand::Update { id, post } => {
            let draft = draft_from(post).await?;
            commands::update_post(state, id, &draft).await?;
            println!("Updated post #{}", id);
        }
        PostsCommand::Delete { id } => {
            commands::delete_post(state, id).await?;
            println!("Deleted post #{}", id);
        }
    }
    Ok(())
}

async fn run_profile(state: &ClientState, command: ProfileCommand) -> Result<()> {
    let profile = match command {
        ProfileCommand::Show => commands::show_profile(state).await?,
        ProfileCommand::Update {
            bio,
            location,
            birth_date,
            picture,
        } => {
            let profile_picture = match picture {
                Some(path) => Some(Upload::from_path(path).await?),
                None => None,
            };
            let update = ProfileUpdate {
                bio,
                location,
                birth_date,
                profile_picture,
            };
            commands::update_profile(state, &update).await?
        }
    };
    print_json(&profile)?;
    if let Some(picture) = &profile.profile_picture {
        println!("picture: {}", state.api().media_url(picture)?);
    }
    Ok(())
}

/// Run background refresh until Ctrl-C or until the session ends
async fn keepalive(state: &ClientState) -> Result<()> {
    let identity = state.session().require_identity().await?;
    let mut events = state.subscribe();
    state.start();
    println!("Keeping session for {} alive, press Ctrl-C to stop", identity.username);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping keepalive");
                break;
            }
            event = events.recv() => match event {
                Ok(AuthEvent::LoggedOut { reason, .. }) => {
                    println!("Session ended ({:?}), log in again", reason);
                    break;
                }
                Ok(event) => debug!(event = event.event_type(), "Auth event"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn draft_from(args: PostArgs) -> Result<PostDraft> {
    let mut draft = PostDraft::new(args.title, args.content);
    draft.tags = args.tags;
    if let Some(path) = args.image {
        draft.image = Some(Upload::from_path(path).await?);
    }
    Ok(draft)
}

async fn registration_from(args: RegisterArgs) -> Result<Registration> {
    let mut registration = Registration::new(args.username, args.email, args.password);
    registration.bio = args.bio;
    registration.location = args.location;
    registration.birth_date = args.birth_date;
    if let Some(path) = args.picture {
        registration.profile_picture = Some(Upload::from_path(path).await?);
    }
    Ok(registration)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
