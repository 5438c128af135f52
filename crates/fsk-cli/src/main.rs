//! CLI interface for fsk - Feishu from the terminal.

use std::env;
use std::fs::OpenOptions;
use std::io::{self, BufRead as _, IsTerminal, Write as _};
use std::path::PathBuf;

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone as _};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use env_logger::fmt::WriteStyle;
use fsk_core::credentials::CredentialFile;
use fsk_core::feishu::card::{CardClient, build_card, unescape_newlines, wide_screen_config};
use fsk_core::feishu::drive::infer_member_type;
use fsk_core::feishu::{
    CalendarClient, CalendarEvent, DriveClient, DriveNodeKind, EventDraft, EventPatch,
    MemberPermission, Task, TaskClient, TaskDraft, TaskMember, TaskPatch, contact,
};
use fsk_core::paths::write_default_config;
use fsk_core::{
    ApiKeyCredentials, AppConfig, AppPaths, CredentialChain, Credentials, FeishuClient, LogLevel,
    REPO_URL, Service, VisionClient,
};
use log::{LevelFilter, debug};
use serde::Serialize;
use serde_json::json;

const APP_NAME: &str = "fsk";

/// Command-line time format, in local time.
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

fn main() -> anyhow::Result<()> {
    try_main()
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {:#?}", ctx.paths);

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Command::Init(cmd) => rt.block_on(handle_init(&ctx, cmd)),
        Command::Auth { command } => rt.block_on(handle_auth(&ctx, command)),
        Command::Calendar { command } => rt.block_on(handle_calendar(&ctx, command)),
        Command::Drive { command } => rt.block_on(handle_drive(&ctx, command)),
        Command::Task { command } => rt.block_on(handle_task(&ctx, command)),
        Command::Card { command } => rt.block_on(handle_card(&ctx, command)),
        Command::Vision { command } => rt.block_on(handle_vision(&ctx, command)),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => {
            handle_completions(shell);
            Ok(())
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "fsk",
    author,
    version,
    about = "Feishu from the terminal: calendar, drive, tasks, cards and image analysis",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

/// Common CLI options shared across all subcommands.
#[derive(Debug, Clone, Args)]
pub struct CommonOpts {
    /// Override the config file path.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
    /// Reduce output to only errors.
    #[arg(short, long, action = clap::ArgAction::SetTrue, global = true)]
    pub quiet: bool,
    /// Increase logging verbosity (stackable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Enable debug logging.
    #[arg(long, global = true)]
    pub debug: bool,
    /// Enable trace logging.
    #[arg(long, global = true)]
    pub trace: bool,
    /// Output machine-readable JSON.
    #[arg(long, global = true)]
    pub json: bool,
    /// Disable ANSI colors in output.
    #[arg(long = "no-color", global = true, conflicts_with = "color")]
    pub no_color: bool,
    /// Control color output.
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    pub color: ColorOption,
    /// Do not write config or credential files.
    #[arg(long = "dry-run", global = true)]
    pub dry_run: bool,
    /// Assume "yes" for interactive prompts.
    #[arg(short = 'y', long = "yes", global = true)]
    pub assume_yes: bool,
}

/// Color output mode.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorOption {
    /// Detect terminal capabilities automatically.
    Auto,
    /// Always emit ANSI color codes.
    Always,
    /// Never emit ANSI color codes.
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Store app credentials for a service.
    Init(InitCommand),
    /// Inspect credentials and tokens.
    Auth {
        #[command(subcommand)]
        command: AuthCommand,
    },
    /// Calendar events.
    Calendar {
        #[command(subcommand)]
        command: CalendarCommand,
    },
    /// Drive files, documents and sharing.
    Drive {
        #[command(subcommand)]
        command: DriveCommand,
    },
    /// Tasks.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Interactive card messages.
    Card {
        #[command(subcommand)]
        command: CardCommand,
    },
    /// Image analysis.
    Vision {
        #[command(subcommand)]
        command: VisionCommand,
    },
    /// Inspect and manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Service to configure: calendar, drive, task, card or vision.
    service: Service,
    /// Overwrite existing credentials.
    #[arg(long)]
    force: bool,
    /// App ID (prompted when omitted).
    #[arg(long, env = "FSK_APP_ID")]
    app_id: Option<String>,
    /// App secret (prompted when omitted).
    #[arg(long, env = "FSK_APP_SECRET", hide_env_values = true)]
    app_secret: Option<String>,
    /// Phone number used to look up your open_id (prompted when omitted).
    #[arg(long, env = "FSK_PHONE")]
    phone: Option<String>,
    /// ARK API key for the vision service (prompted when omitted).
    #[arg(long, env = "FSK_ARK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum AuthCommand {
    /// Show where credentials come from and whether they are accepted.
    Status {
        /// Service to check.
        service: Service,
    },
    /// Print a tenant access token.
    Token {
        /// Service whose credentials to use.
        service: Service,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum CalendarCommand {
    /// List upcoming events.
    List {
        /// Number of days to show (default from config).
        #[arg(long)]
        days: Option<u32>,
        /// Calendar id (default: the app's first calendar).
        #[arg(long)]
        calendar: Option<String>,
    },
    /// Create an event.
    Create {
        /// Event title.
        summary: String,
        /// Start time.
        #[arg(long, value_name = "YYYY-MM-DD HH:MM")]
        time: String,
        /// Length in minutes (default from config).
        #[arg(long)]
        duration: Option<u32>,
        /// Attendee open_id (repeatable; default: yourself).
        #[arg(long = "attendee", value_name = "OPEN_ID")]
        attendees: Vec<String>,
        /// Description (default from the configured template).
        #[arg(long)]
        desc: Option<String>,
        /// Calendar id.
        #[arg(long)]
        calendar: Option<String>,
    },
    /// Change an event.
    Modify {
        /// Event id.
        event_id: String,
        /// New title.
        #[arg(long)]
        summary: Option<String>,
        /// New start time.
        #[arg(long, value_name = "YYYY-MM-DD HH:MM")]
        time: Option<String>,
        /// New length in minutes.
        #[arg(long)]
        duration: Option<u32>,
        /// New description.
        #[arg(long)]
        desc: Option<String>,
        /// Calendar id.
        #[arg(long)]
        calendar: Option<String>,
    },
    /// Delete an event.
    Delete {
        /// Event id.
        event_id: String,
        /// Calendar id.
        #[arg(long)]
        calendar: Option<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum DriveCommand {
    /// Create a folder, doc, sheet or bitable.
    Create {
        /// folder, doc, sheet or bitable.
        kind: DriveNodeKind,
        /// Name or title.
        name: String,
        /// Parent folder token (default: root).
        #[arg(long, default_value = "")]
        folder: String,
    },
    /// Upload a local file.
    Upload {
        /// File to upload.
        path: PathBuf,
        /// Parent folder token (default: root).
        #[arg(long, default_value = "")]
        folder: String,
    },
    /// List files in a folder.
    List {
        /// Folder token (default: root).
        #[arg(default_value = "")]
        folder: String,
    },
    /// Delete a file or folder.
    Delete {
        /// File token.
        token: String,
        /// Resource type (file, docx, sheet, bitable, folder).
        #[arg(long = "type", default_value = "file")]
        file_type: String,
    },
    /// Rename a file.
    Rename {
        /// File token.
        token: String,
        /// New name.
        name: String,
        /// Resource type.
        #[arg(long = "type", default_value = "file")]
        file_type: String,
    },
    /// Move a file into another folder.
    Move {
        /// File token.
        token: String,
        /// Destination folder token.
        folder: String,
        /// Resource type.
        #[arg(long = "type", default_value = "file")]
        file_type: String,
    },
    /// Append a paragraph to a document.
    Write {
        /// Document id.
        document_id: String,
        /// Text to append (`\n` becomes a newline).
        content: String,
    },
    /// Add a collaborator.
    Share {
        /// Resource token.
        token: String,
        /// open_id, user_id or email.
        member_id: String,
        /// Resource type.
        #[arg(long = "type", default_value = "docx")]
        resource_type: String,
        /// view, edit or full_access.
        #[arg(long, default_value = "full_access")]
        role: String,
        /// Member id type (openid, userid, email, ...); inferred when omitted.
        #[arg(long)]
        member_type: Option<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum TaskCommand {
    /// Create a task.
    Create {
        /// Task title.
        summary: String,
        /// Description.
        #[arg(long)]
        desc: Option<String>,
        /// Due time.
        #[arg(long, value_name = "YYYY-MM-DD HH:MM")]
        due: Option<String>,
        /// Assignee open_id (repeatable; default: yourself).
        #[arg(long = "assignee", value_name = "OPEN_ID")]
        assignees: Vec<String>,
    },
    /// List tasks.
    List {
        /// Page size (default from config).
        #[arg(long)]
        limit: Option<u32>,
        /// Continue from a previous page.
        #[arg(long)]
        page_token: Option<String>,
        /// Listing type (e.g. my_tasks).
        #[arg(long = "type")]
        list_type: Option<String>,
    },
    /// Show one task.
    Get {
        /// Task guid.
        guid: String,
    },
    /// Mark a task completed.
    Complete {
        /// Task guid.
        guid: String,
    },
    /// Change a task.
    Modify {
        /// Task guid.
        guid: String,
        /// New title.
        #[arg(long)]
        summary: Option<String>,
        /// New description.
        #[arg(long)]
        desc: Option<String>,
        /// New due time.
        #[arg(long, value_name = "YYYY-MM-DD HH:MM")]
        due: Option<String>,
    },
    /// Delete a task.
    Delete {
        /// Task guid.
        guid: String,
    },
}

#[derive(Debug, Clone, Args)]
struct CardContent {
    /// Card title.
    title: String,
    /// Markdown body (`\n` becomes a newline).
    content: String,
    /// Header color (default from config).
    #[arg(long)]
    template: Option<String>,
    /// Use the wide-screen layout.
    #[arg(long)]
    wide: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum CardCommand {
    /// Send a card.
    Send {
        #[command(flatten)]
        card: CardContent,
        /// Receiver (default: yourself).
        #[arg(long)]
        receive_id: Option<String>,
        /// open_id, user_id, union_id, email or chat_id (default from config).
        #[arg(long)]
        receive_id_type: Option<String>,
    },
    /// Print the card JSON without sending it.
    Preview {
        #[command(flatten)]
        card: CardContent,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum VisionCommand {
    /// Describe an image.
    Analyze {
        /// Image URL.
        url: String,
        /// Question to ask (default from config).
        #[arg(long)]
        prompt: Option<String>,
        /// Model id (default from config).
        #[arg(long)]
        model: Option<String>,
    },
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration.
    Show,
    /// Print the resolved config file path.
    Path,
    /// Print all resolved paths.
    Paths,
    /// Print the JSON schema.
    Schema,
    /// Regenerate the default configuration file.
    Reset,
    /// Write the JSON schema and example config to a directory.
    Generate {
        /// Output directory.
        #[arg(long, default_value = ".")]
        out: PathBuf,
        /// Only check that existing files are up to date.
        #[arg(long)]
        check: bool,
    },
}

// ─── Runtime ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.as_deref())?;
        let config = AppConfig::load(&paths, common.dry_run)?;
        let paths = paths.apply_overrides(&config)?;
        let ctx = Self {
            common,
            paths,
            config,
        };
        ctx.ensure_directories()?;
        Ok(ctx)
    }

    fn init_logging(&self) -> Result<()> {
        if self.common.quiet {
            log::set_max_level(LevelFilter::Off);
            return Ok(());
        }
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
        builder.filter_level(self.effective_log_level());

        let force_color = matches!(self.common.color, ColorOption::Always)
            || env::var_os("FORCE_COLOR").is_some();
        let disable_color = self.common.no_color
            || matches!(self.common.color, ColorOption::Never)
            || env::var_os("NO_COLOR").is_some()
            || (!force_color && !io::stderr().is_terminal());

        if disable_color {
            builder.write_style(WriteStyle::Never);
        } else if force_color {
            builder.write_style(WriteStyle::Always);
        } else {
            builder.write_style(WriteStyle::Auto);
        }

        if let Some(ref path) = self.config.logging.file {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
            builder.write_style(WriteStyle::Never);
        }

        builder.try_init().or_else(|err| {
            if self.common.verbose > 0 {
                eprintln!("logger already initialized: {err}");
            }
            Ok(())
        })
    }

    const fn effective_log_level(&self) -> LevelFilter {
        if self.common.trace {
            LevelFilter::Trace
        } else if self.common.debug {
            LevelFilter::Debug
        } else {
            match self.common.verbose {
                0 => level_filter(self.config.logging.level),
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    fn ensure_directories(&self) -> Result<()> {
        if self.common.dry_run {
            self.paths.log_dry_run();
            return Ok(());
        }
        self.paths.ensure_directories()
    }

    fn chain(&self, service: Service) -> CredentialChain {
        CredentialChain::for_service(service, &self.paths, &self.config.credentials)
            .with_migration(!self.common.dry_run)
    }

    fn feishu(&self, service: Service) -> Result<FeishuClient> {
        if !service.uses_token_exchange() {
            bail!("{service} uses a static API key, not app credentials");
        }
        Ok(FeishuClient::from_chain(&self.chain(service), &self.config)?)
    }

    fn store_credentials<T: CredentialFile>(&self, chain: &CredentialChain, creds: &T) -> Result<()> {
        if self.common.dry_run {
            log::info!(
                "dry-run: would write {} credentials to {}",
                chain.service(),
                chain.canonical().display()
            );
            return Ok(());
        }
        chain.store(creds)?;
        Ok(())
    }
}

const fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::Error,
        LogLevel::Warn => LevelFilter::Warn,
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
        LogLevel::Trace => LevelFilter::Trace,
    }
}

// ─── Handlers ────────────────────────────────────────────────────────

async fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    let chain = ctx.chain(cmd.service);
    if chain.canonical().exists() && !(cmd.force || ctx.common.assume_yes) {
        bail!(
            "{} credentials already exist at {} (use --force to overwrite)",
            cmd.service,
            chain.canonical().display()
        );
    }

    if !cmd.service.uses_token_exchange() {
        let api_key = value_or_prompt(cmd.api_key, "API key")?;
        ctx.store_credentials(&chain, &ApiKeyCredentials { api_key })?;
        println!("{} configured.", cmd.service);
        return Ok(());
    }

    let service = cmd.service;
    let app_id = value_or_prompt(cmd.app_id, "App ID")?;
    let app_secret = value_or_prompt(cmd.app_secret, "App secret")?;
    let phone = value_or_prompt(cmd.phone, "Phone number")?;
    let mut creds = Credentials::new(app_id, app_secret).with_phone(&phone);

    let client = FeishuClient::from_config(&ctx.config, Some(creds.clone()))?;
    client
        .session()
        .get_token()
        .await
        .context("verifying app credentials")?;

    match contact::open_id_by_mobile(&client, &phone).await {
        Ok(Some(open_id)) => creds = creds.with_open_id(open_id),
        Ok(None) if service.requires_open_id() => {
            bail!("no user found for phone number {phone}");
        }
        Err(e) if service.requires_open_id() => {
            return Err(e).context("resolving your open_id");
        }
        Ok(None) => log::warn!("no user found for phone number {phone}; continuing without open_id"),
        Err(e) => log::warn!("could not resolve open_id ({e}); continuing without it"),
    }

    ctx.store_credentials(&chain, &creds)?;
    match &creds.open_id {
        Some(open_id) => println!("{service} configured. open_id: {open_id}"),
        None => println!("{service} configured."),
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct AuthStatus {
    service: Service,
    credentials_file: PathBuf,
    configured: bool,
    app_id: Option<String>,
    open_id: Option<String>,
    token_expires_at: Option<String>,
    error: Option<String>,
}

async fn handle_auth(ctx: &RuntimeContext, command: AuthCommand) -> Result<()> {
    match command {
        AuthCommand::Status { service } => {
            let status = auth_status(ctx, service).await?;
            if ctx.common.json {
                return print_json(&status);
            }
            println!("service:     {}", status.service);
            println!("credentials: {}", status.credentials_file.display());
            if !status.configured {
                println!("status:      not configured (run '{APP_NAME} init {service}')");
                return Ok(());
            }
            if let Some(app_id) = &status.app_id {
                println!("app id:      {app_id}");
            }
            if let Some(open_id) = &status.open_id {
                println!("open_id:     {open_id}");
            }
            println!("status:      {}", token_summary(&status));
            Ok(())
        }
        AuthCommand::Token { service } => {
            let client = ctx.feishu(service)?;
            let token = client.session().get_token().await?;
            if ctx.common.json {
                return print_json(&json!({
                    "token": token.value(),
                    "expires_at": token.expires_at(),
                }));
            }
            println!("{}", token.value());
            Ok(())
        }
    }
}

fn token_summary(status: &AuthStatus) -> String {
    match (&status.token_expires_at, &status.error) {
        (Some(expires), _) => format!("ok, token valid until {expires}"),
        (None, Some(error)) => format!("failed ({error})"),
        (None, None) => "ok".to_string(),
    }
}

async fn auth_status(ctx: &RuntimeContext, service: Service) -> Result<AuthStatus> {
    let chain = ctx.chain(service);
    let mut status = AuthStatus {
        service,
        credentials_file: chain.canonical().to_path_buf(),
        configured: false,
        app_id: None,
        open_id: None,
        token_expires_at: None,
        error: None,
    };

    if !service.uses_token_exchange() {
        status.configured = chain.load::<ApiKeyCredentials>().is_some();
        return Ok(status);
    }

    let client = ctx.feishu(service)?;
    if !client.session().is_configured() {
        return Ok(status);
    }
    let creds = client.credentials()?;
    status.configured = true;
    status.app_id = Some(creds.client_id.clone());
    status.open_id.clone_from(&creds.open_id);

    match client.session().get_token().await {
        Ok(token) => status.token_expires_at = Some(format_datetime(&token.expires_at().with_timezone(&Local))),
        Err(e) => status.error = Some(e.to_string()),
    }
    Ok(status)
}

async fn handle_calendar(ctx: &RuntimeContext, command: CalendarCommand) -> Result<()> {
    let calendar = CalendarClient::new(ctx.feishu(Service::Calendar)?, ctx.config.calendar.clone());

    match command {
        CalendarCommand::List { days, calendar: id } => {
            let calendar_id = calendar.resolve_calendar_id(id.as_deref()).await?;
            let days = days.unwrap_or(ctx.config.calendar.list_days);
            let now = Local::now().timestamp();
            let end = now + i64::from(days) * 24 * 3600;
            let events = calendar.list_events(&calendar_id, now, end).await?;
            if ctx.common.json {
                return print_json(&events);
            }
            if events.is_empty() {
                println!("No events in the next {days} days.");
                return Ok(());
            }
            println!("Next {days} days:");
            print_events(&events);
            Ok(())
        }
        CalendarCommand::Create {
            summary,
            time,
            duration,
            attendees,
            desc,
            calendar: calendar_id,
        } => {
            let start = parse_local_time(&time)?.timestamp();
            let minutes = duration.unwrap_or(ctx.config.calendar.default_duration);
            let draft = EventDraft {
                summary,
                start,
                end: start + i64::from(minutes) * 60,
                attendees,
                description: desc,
                calendar_id,
            };
            let event = calendar.create_event(draft).await?;
            if ctx.common.json {
                return print_json(&event);
            }
            println!("Created event {}", event.event_id);
            print_events(std::slice::from_ref(&event));
            Ok(())
        }
        CalendarCommand::Modify {
            event_id,
            summary,
            time,
            duration,
            desc,
            calendar: id,
        } => {
            let patch = EventPatch {
                summary,
                description: desc,
                start: time.as_deref().map(parse_local_time).transpose()?.map(|t| t.timestamp()),
                duration_minutes: duration,
            };
            let calendar_id = calendar.resolve_calendar_id(id.as_deref()).await?;
            let event = calendar.update_event(&calendar_id, &event_id, &patch).await?;
            if ctx.common.json {
                return print_json(&event);
            }
            println!("Updated event {}", event.event_id);
            print_events(std::slice::from_ref(&event));
            Ok(())
        }
        CalendarCommand::Delete { event_id, calendar: id } => {
            let calendar_id = calendar.resolve_calendar_id(id.as_deref()).await?;
            calendar.delete_event(&calendar_id, &event_id).await?;
            print_done(ctx, &format!("Deleted event {event_id}"), &json!({ "event_id": event_id }))
        }
    }
}

async fn handle_drive(ctx: &RuntimeContext, command: DriveCommand) -> Result<()> {
    let drive = DriveClient::new(ctx.feishu(Service::Drive)?);

    match command {
        DriveCommand::Create { kind, name, folder } => {
            let node = drive.create_node(kind, &name, &folder).await?;
            if ctx.common.json {
                return print_json(&node);
            }
            println!("Created {} '{name}'", node.kind);
            println!("  token: {}", node.token);
            println!("  url:   {}", node.url);
            Ok(())
        }
        DriveCommand::Upload { path, folder } => {
            let token = drive.upload_file(&path, &folder).await?;
            print_done(
                ctx,
                &format!("Uploaded {} as {token}", path.display()),
                &json!({ "file_token": token }),
            )
        }
        DriveCommand::List { folder } => {
            let files = drive.list_files(&folder).await?;
            if ctx.common.json {
                return print_json(&files);
            }
            if files.is_empty() {
                println!("Folder is empty.");
            }
            for file in &files {
                println!("{:<8} {:<40} {}", file.file_type, truncate(&file.name, 40), file.token);
            }
            Ok(())
        }
        DriveCommand::Delete { token, file_type } => {
            drive.delete_file(&token, &file_type).await?;
            print_done(ctx, &format!("Deleted {file_type} {token}"), &json!({ "token": token }))
        }
        DriveCommand::Rename {
            token,
            name,
            file_type,
        } => {
            drive.rename_file(&token, &name, &file_type).await?;
            print_done(
                ctx,
                &format!("Renamed {token} to '{name}'"),
                &json!({ "token": token, "name": name }),
            )
        }
        DriveCommand::Move {
            token,
            folder,
            file_type,
        } => {
            drive.move_file(&token, &folder, &file_type).await?;
            print_done(
                ctx,
                &format!("Moved {token} into {folder}"),
                &json!({ "token": token, "folder_token": folder }),
            )
        }
        DriveCommand::Write {
            document_id,
            content,
        } => {
            drive
                .append_text(&document_id, &unescape_newlines(&content))
                .await?;
            print_done(
                ctx,
                &format!("Appended text to {document_id}"),
                &json!({ "document_id": document_id }),
            )
        }
        DriveCommand::Share {
            token,
            member_id,
            resource_type,
            role,
            member_type,
        } => {
            let member_type = match member_type {
                Some(member_type) => member_type,
                None => infer_member_type(&member_id)?.to_string(),
            };
            let member = MemberPermission {
                member_type,
                member_id,
                perm: role,
            };
            drive.add_member(&token, &resource_type, &member).await?;
            if ctx.common.json {
                return print_json(&member);
            }
            println!(
                "Shared {token} with {} ({}) as {}",
                member.member_id, member.member_type, member.perm
            );
            Ok(())
        }
    }
}

async fn handle_task(ctx: &RuntimeContext, command: TaskCommand) -> Result<()> {
    let tasks = TaskClient::new(ctx.feishu(Service::Task)?, ctx.config.task);

    match command {
        TaskCommand::Create {
            summary,
            desc,
            due,
            assignees,
        } => {
            let draft = TaskDraft {
                summary,
                description: desc,
                due_ms: due.as_deref().map(parse_local_time).transpose()?.map(|t| t.timestamp_millis()),
                members: assignees.into_iter().map(TaskMember::assignee).collect(),
            };
            let task = tasks.create_task(draft).await?;
            print_task_result(ctx, "Created", &task)
        }
        TaskCommand::List {
            limit,
            page_token,
            list_type,
        } => {
            let page = tasks
                .list_tasks(limit, page_token.as_deref(), list_type.as_deref())
                .await?;
            if ctx.common.json {
                return print_json(&json!({
                    "items": page.items,
                    "page_token": page.page_token,
                }));
            }
            if page.items.is_empty() {
                println!("No tasks.");
            }
            for task in &page.items {
                print_task(task);
            }
            if let Some(token) = page.page_token {
                println!("More: {APP_NAME} task list --page-token {token}");
            }
            Ok(())
        }
        TaskCommand::Get { guid } => {
            let task = tasks.get_task(&guid).await?;
            if ctx.common.json {
                return print_json(&task);
            }
            print_task(&task);
            if !task.description.is_empty() {
                println!("    {}", task.description);
            }
            if !task.url.is_empty() {
                println!("    {}", task.url);
            }
            Ok(())
        }
        TaskCommand::Complete { guid } => {
            let task = tasks.complete_task(&guid).await?;
            print_task_result(ctx, "Completed", &task)
        }
        TaskCommand::Modify {
            guid,
            summary,
            desc,
            due,
        } => {
            let patch = TaskPatch {
                summary,
                description: desc,
                due_ms: due.as_deref().map(parse_local_time).transpose()?.map(|t| t.timestamp_millis()),
            };
            let task = tasks.update_task(&guid, &patch).await?;
            print_task_result(ctx, "Updated", &task)
        }
        TaskCommand::Delete { guid } => {
            tasks.delete_task(&guid).await?;
            print_done(ctx, &format!("Deleted task {guid}"), &json!({ "guid": guid }))
        }
    }
}

async fn handle_card(ctx: &RuntimeContext, command: CardCommand) -> Result<()> {
    match command {
        CardCommand::Send {
            card,
            receive_id,
            receive_id_type,
        } => {
            let client = CardClient::new(ctx.feishu(Service::Card)?, ctx.config.card.clone());
            let body = card_json(&card, client.template());
            let message_id = client
                .send_card(&body, receive_id.as_deref(), receive_id_type.as_deref())
                .await?;
            print_done(
                ctx,
                &format!("Sent card, message id {message_id}"),
                &json!({ "message_id": message_id }),
            )
        }
        CardCommand::Preview { card } => {
            print_json(&card_json(&card, &ctx.config.card.template))
        }
    }
}

fn card_json(card: &CardContent, default_template: &str) -> serde_json::Value {
    build_card(
        &card.title,
        &unescape_newlines(&card.content),
        card.template.as_deref().unwrap_or(default_template),
        card.wide.then(wide_screen_config),
    )
}

async fn handle_vision(ctx: &RuntimeContext, command: VisionCommand) -> Result<()> {
    let client = VisionClient::from_chain(&ctx.chain(Service::Vision), &ctx.config)?;
    match command {
        VisionCommand::Analyze { url, prompt, model } => {
            let answer = client
                .analyze_image(&url, prompt.as_deref(), model.as_deref())
                .await?;
            if ctx.common.json {
                return print_json(&json!({ "url": url, "content": answer }));
            }
            println!("{answer}");
            Ok(())
        }
    }
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if ctx.common.json {
                print_json(&ctx.config)
            } else {
                println!("{:#?}", ctx.config);
                Ok(())
            }
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Paths => {
            let credentials: Vec<(Service, PathBuf)> = Service::ALL
                .into_iter()
                .map(|svc| (svc, ctx.chain(svc).canonical().to_path_buf()))
                .collect();
            if ctx.common.json {
                let files: serde_json::Map<String, serde_json::Value> = credentials
                    .iter()
                    .map(|(svc, path)| (svc.to_string(), json!(path)))
                    .collect();
                return print_json(&json!({
                    "config": ctx.paths.config_file,
                    "credentials_dir": ctx.paths.credentials_dir,
                    "credentials": files,
                }));
            }
            println!("config:      {}", ctx.paths.config_file.display());
            println!("credentials: {}", ctx.paths.credentials_dir.display());
            for (svc, path) in credentials {
                println!("  {svc:<9} {}", path.display());
            }
            Ok(())
        }
        ConfigCommand::Schema => {
            println!("{}", fsk_core::generate_schema(APP_NAME, REPO_URL)?);
            Ok(())
        }
        ConfigCommand::Reset => {
            if ctx.common.dry_run {
                log::info!(
                    "dry-run: would reset config at {}",
                    ctx.paths.config_file.display()
                );
                return Ok(());
            }
            write_default_config(&ctx.paths.config_file)
        }
        ConfigCommand::Generate { out, check } => {
            if check {
                fsk_core::check_generated_files(&out, APP_NAME, REPO_URL)?;
                println!("{} is up to date", out.display());
                return Ok(());
            }
            if ctx.common.dry_run {
                log::info!("dry-run: would write generated files to {}", out.display());
                return Ok(());
            }
            fsk_core::write_generated_files(&out, APP_NAME, REPO_URL)?;
            println!("wrote schema and example config to {}", out.display());
            Ok(())
        }
    }
}

fn handle_completions(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
}

// ─── Input helpers ───────────────────────────────────────────────────

fn value_or_prompt(value: Option<String>, label: &str) -> Result<String> {
    let value = match value {
        Some(value) => value,
        None => prompt(label)?,
    };
    let value = value.trim().to_string();
    if value.is_empty() {
        bail!("{label} cannot be empty");
    }
    Ok(value)
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{label}: ");
    io::stderr().flush()?;
    let mut line = String::new();
    let read = io::stdin()
        .lock()
        .read_line(&mut line)
        .context("reading input")?;
    if read == 0 {
        bail!("no input for {label}");
    }
    Ok(line)
}

fn parse_local_time(text: &str) -> Result<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), TIME_FORMAT)
        .with_context(|| format!("invalid time '{text}', expected YYYY-MM-DD HH:MM"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow!("'{text}' does not exist in the local time zone"))
}

// ─── Formatting helpers ──────────────────────────────────────────────

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output to JSON")?
    );
    Ok(())
}

fn print_done(ctx: &RuntimeContext, message: &str, value: &serde_json::Value) -> Result<()> {
    if ctx.common.json {
        return print_json(value);
    }
    println!("{message}");
    Ok(())
}

fn print_events(events: &[CalendarEvent]) {
    for (i, event) in events.iter().enumerate() {
        let summary = if event.summary.is_empty() {
            "(no title)"
        } else {
            &event.summary
        };
        println!("{:2}. {summary}", i + 1);
        println!(
            "    {} - {}",
            format_unix(event.start_time.unix()),
            format_unix(event.end_time.unix())
        );
        println!("    {}", dim(&event.event_id));
        if !event.description.is_empty() {
            println!("    {}", truncate(&event.description.replace('\n', " "), 50));
        }
    }
}

fn print_task_result(ctx: &RuntimeContext, verb: &str, task: &Task) -> Result<()> {
    if ctx.common.json {
        return print_json(task);
    }
    println!("{verb} task {}", task.guid);
    print_task(task);
    Ok(())
}

fn print_task(task: &Task) {
    let mark = if task.is_completed() { "x" } else { " " };
    let due = task
        .due
        .as_ref()
        .and_then(|due| due.timestamp.parse::<i64>().ok())
        .map(|ms| format!(" (due {})", format_unix(ms / 1000)))
        .unwrap_or_default();
    println!("[{mark}] {}{due}  {}", task.summary, dim(&task.guid));
}

fn format_unix(secs: i64) -> String {
    Local
        .timestamp_opt(secs, 0)
        .single()
        .map_or_else(|| secs.to_string(), |dt| format_datetime(&dt))
}

fn format_datetime(dt: &DateTime<Local>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max - 1).collect();
        format!("{truncated}...")
    }
}

fn dim(s: &str) -> String {
    if io::stdout().is_terminal() && env::var_os("NO_COLOR").is_none() {
        format!("\x1b[2m{s}\x1b[0m")
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_local_times() {
        let t = parse_local_time("2026-02-11 14:00").expect("valid time");
        assert_eq!(format_datetime(&t), "2026-02-11 14:00");
        assert_eq!(format_unix(t.timestamp()), "2026-02-11 14:00");
        assert!(parse_local_time("11/02/2026 2pm").is_err());
    }

    #[test]
    fn parses_calendar_create() {
        let cli = Cli::try_parse_from([
            "fsk",
            "calendar",
            "create",
            "Standup",
            "--time",
            "2026-02-11 09:30",
            "--attendee",
            "ou_a",
            "--attendee",
            "ou_b",
        ])
        .expect("parse");
        let Command::Calendar {
            command: CalendarCommand::Create { attendees, duration, .. },
        } = cli.command
        else {
            panic!("expected calendar create");
        };
        assert_eq!(attendees, vec!["ou_a".to_string(), "ou_b".to_string()]);
        assert_eq!(duration, None);
    }

    #[test]
    fn parses_services_and_drive_kinds() {
        let cli = Cli::try_parse_from(["fsk", "init", "Vision"]).expect("parse");
        assert!(matches!(cli.command, Command::Init(InitCommand { service: Service::Vision, .. })));

        let cli = Cli::try_parse_from(["fsk", "drive", "create", "doc", "Notes"]).expect("parse");
        assert!(matches!(
            cli.command,
            Command::Drive {
                command: DriveCommand::Create { kind: DriveNodeKind::Docx, .. }
            }
        ));

        assert!(Cli::try_parse_from(["fsk", "init", "mail"]).is_err());
    }

    #[test]
    fn card_preview_uses_defaults() {
        let card = CardContent {
            title: "Build".to_string(),
            content: "line1\\nline2".to_string(),
            template: None,
            wide: true,
        };
        let json = card_json(&card, "blue");
        assert_eq!(json["header"]["template"], "blue");
        assert_eq!(json["body"]["elements"][0]["content"], "line1\nline2");
        assert_eq!(json["config"]["wide_screen_mode"], true);
    }

    #[test]
    fn token_failures_are_reported_as_failed() {
        let mut status = AuthStatus {
            service: Service::Drive,
            credentials_file: PathBuf::from("drive.json"),
            configured: true,
            app_id: Some("cli_a".to_string()),
            open_id: None,
            token_expires_at: None,
            error: Some("token exchange failed: token request failed: connection refused".to_string()),
        };
        let summary = token_summary(&status);
        assert!(summary.starts_with("failed ("), "{summary}");
        assert!(summary.contains("connection refused"));

        status.error = None;
        status.token_expires_at = Some("2026-02-11 16:00".to_string());
        assert_eq!(token_summary(&status), "ok, token valid until 2026-02-11 16:00");
    }

    #[test]
    fn dry_run_chains_do_not_migrate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_file = dir.path().join("config.toml");
        let credentials_dir = dir.path().join("credentials");
        std::fs::create_dir_all(&credentials_dir).expect("mkdir");
        std::fs::write(
            credentials_dir.join("calendar.json"),
            r#"{"app_id": "X", "app_secret": "Y"}"#,
        )
        .expect("write");

        let cli = Cli::try_parse_from(["fsk", "--dry-run", "auth", "status", "drive"]).expect("parse");
        let ctx = RuntimeContext {
            common: cli.common,
            paths: AppPaths {
                config_file,
                credentials_dir: credentials_dir.clone(),
                home_dir: None,
            },
            config: AppConfig::default(),
        };

        let creds: Credentials = ctx.chain(Service::Drive).load().expect("calendar fallback");
        assert_eq!(creds.client_id, "X");
        assert!(!credentials_dir.join("drive.json").exists());
    }

    #[test]
    fn truncates_long_text() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 5), "abcd...");
    }
}
