//! Command-line front end for a shared totem store.
//!
//! # Responsibility
//! - Resolve configuration from flags and `TOTEMS_*` environment variables.
//! - Run one chat command per invocation and print reply and notifications.

use clap::{Parser, Subcommand};
use log::info;
use std::error::Error;
use std::path::PathBuf;
use totems_core::db::open_db;
use totems_core::{
    current_epoch_ms, default_log_level, init_logging, CommandHandler, Invocation, LogLevel,
    RecordingNotifier, RequesterDirectory, SqliteRequesterDirectory, SqliteTotemRepository,
    TotemService,
};

#[derive(Parser, Debug)]
#[command(name = "totems", version)]
#[command(about = "Take turns on shared resources")]
struct Args {
    /// Store file shared by every totems process
    #[arg(long, env = "TOTEMS_DB", value_name = "PATH", default_value = "totems.sqlite3")]
    db: PathBuf,

    /// Absolute directory for rolling log files; logging is off when unset
    #[arg(long, env = "TOTEMS_LOG_DIR", value_name = "PATH")]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, env = "TOTEMS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Display names allowed to create and destroy totems
    #[arg(long, env = "TOTEMS_ADMINS", value_delimiter = ',')]
    admins: Vec<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Send one chat message, e.g. `say --as alice totems add deploy`
    Say {
        #[arg(long = "as", value_name = "NAME")]
        user: String,
        #[arg(trailing_var_arg = true, required = true)]
        text: Vec<String>,
    },
    /// Print a totem's waiting line as JSON
    Snapshot { totem: String },
    /// Manage known requesters
    #[command(subcommand)]
    Users(UsersCommand),
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
    Add { name: String },
    List,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    if let Some(log_dir) = &args.log_dir {
        let level = match &args.log_level {
            Some(level) => LogLevel::parse(level)?,
            None => default_log_level(),
        };
        init_logging(level, log_dir)?;
    }

    let conn = open_db(&args.db)?;
    let directory = SqliteRequesterDirectory::try_new(&conn)?;
    let service = TotemService::new(SqliteTotemRepository::try_new(&conn)?);

    match args.command {
        CliCommand::Say { user, text } => {
            let requester_id = directory.register(&user, current_epoch_ms())?;
            let is_admin = args
                .admins
                .iter()
                .any(|admin| admin.trim().eq_ignore_ascii_case(user.trim()));
            let notifier = RecordingNotifier::new();
            let handler = CommandHandler::new(&service, &directory, &notifier);
            let text = text.join(" ");

            match handler.handle(&Invocation {
                requester_id: &requester_id,
                display_name: user.trim(),
                is_admin,
                text: &text,
            })? {
                Some(reply) => println!("{reply}"),
                None => println!("(not a totems command)"),
            }
            for notification in notifier.take() {
                let recipient = directory
                    .display_name(&notification.requester_id)?
                    .unwrap_or_else(|| notification.requester_id.to_string());
                println!("-> @{recipient}: {}", notification.message);
            }
        }
        CliCommand::Snapshot { totem } => {
            let entries = service.snapshot(&totem)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        CliCommand::Users(UsersCommand::Add { name }) => {
            let id = directory.register(&name, current_epoch_ms())?;
            info!("event=requester_register module=cli status=ok requester={id}");
            println!("{name} = {id}");
        }
        CliCommand::Users(UsersCommand::List) => {
            for record in directory.list()? {
                println!("{} {}", record.id, record.display_name);
            }
        }
    }

    Ok(())
}
