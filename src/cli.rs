//! Command-line interface definition and argument parsing

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use quill_lib::api::DEFAULT_PER_PAGE;

/// Command-line arguments for Quill
#[derive(Parser, Debug)]
#[command(
    name = "quill",
    about = "Command-line client for the Quill blog API",
    version
)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for Quill
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in and store the session
    Login {
        username: String,

        #[arg(long, env = "QUILL_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// End the stored session
    Logout,

    /// Create an account
    Register(RegisterArgs),

    /// Show the logged-in user
    Whoami,

    /// Browse and edit posts
    #[command(subcommand)]
    Posts(PostsCommand),

    /// Show or edit your profile
    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Keep the session fresh in the background until Ctrl-C
    Keepalive,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    pub username: String,

    #[arg(long)]
    pub email: String,

    #[arg(long, env = "QUILL_PASSWORD", hide_env_values = true)]
    pub password: String,

    #[arg(long, default_value = "")]
    pub bio: String,

    #[arg(long, default_value = "")]
    pub location: String,

    /// Birth date as YYYY-MM-DD
    #[arg(long, value_parser = parse_date)]
    pub birth_date: Option<NaiveDate>,

    /// Profile picture to upload
    #[arg(long)]
    pub picture: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum PostsCommand {
    /// List posts a page at a time
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: usize,
    },

    /// Show one post
    Show { id: u64 },

    /// Publish a new post
    Create(PostArgs),

    /// Replace one of your posts
    Update {
        id: u64,

        #[command(flatten)]
        post: PostArgs,
    },

    /// Delete one of your posts
    Delete { id: u64 },
}

#[derive(Args, Debug)]
pub struct PostArgs {
    #[arg(long)]
    pub title: String,

    /// Post body (markup is sent as-is)
    #[arg(long)]
    pub content: String,

    /// Comma separated tags
    #[arg(long)]
    pub tags: Option<String>,

    /// Image to attach
    #[arg(long)]
    pub image: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Show your profile
    Show,

    /// Change profile fields; omitted fields stay as they are
    Update {
        #[arg(long)]
        bio: Option<String>,

        #[arg(long)]
        location: Option<String>,

        /// Birth date as YYYY-MM-DD
        #[arg(long, value_parser = parse_date)]
        birth_date: Option<NaiveDate>,

        /// New profile picture
        #[arg(long)]
        picture: Option<PathBuf>,
    },
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}
