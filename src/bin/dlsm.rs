use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dlsite_manager::catalog::HttpCatalogClient;
use dlsite_manager::config::{ConfigLoader, Settings};
use dlsite_manager::domain::{collect_item_ids, parse_item_reference};
use dlsite_manager::downloader::{Downloader, HttpDownloadSource};
use dlsite_manager::error::ManagerError;
use dlsite_manager::extract::SystemUnarchiver;
use dlsite_manager::login::{Authenticator, HttpAuthenticator, open_session};
use dlsite_manager::manager::{
    CleanResult, DownloadOptions, DownloadResult, ExtractResult, FindResult, Manager,
};
use dlsite_manager::mylist::{Mylist, MylistEditor};
use dlsite_manager::output::{JsonOutput, OutputMode};
use dlsite_manager::points::{PointsOutcome, click_for_points};
use dlsite_manager::purchases::{
    HttpPurchaseClient, fetch_all_purchases, parse_relative_duration, purchased_within,
};
use dlsite_manager::session::Credential;
use dlsite_manager::store::Store;
use dlsite_manager::tui::{Operation, Tui};

type HttpManager = Manager<
    Downloader<HttpDownloadSource>,
    HttpAuthenticator,
    HttpCatalogClient,
    SystemUnarchiver,
>;

#[derive(Parser)]
#[command(name = "dlsm")]
#[command(about = "Download purchased DLsite works and keep them organized in one directory tree")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Directory holding config, session and credential files.
    #[arg(long, global = true)]
    config_dir: Option<Utf8PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Store account and management directory settings")]
    Config(ConfigArgs),
    #[command(about = "Download works and place them in the management directory")]
    Download(DownloadArgs),
    #[command(about = "Extract and place whatever is left in the staging directory")]
    Extract(ExtractArgs),
    #[command(about = "Show where works live in the management directory")]
    Find(FindArgs),
    #[command(about = "Empty watched work directories without a #/! marker")]
    Clean(CleanArgs),
    #[command(about = "List purchased works")]
    Purchased(PurchasedArgs),
    #[command(about = "Edit mylists")]
    Mylist(MylistArgs),
    #[command(about = "Draw the daily points")]
    Points,
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(short, long)]
    username: Option<String>,

    #[arg(short, long)]
    password: Option<String>,

    #[arg(short, long)]
    management_dir: Option<String>,

    #[arg(long)]
    watched_dir: Option<String>,

    /// Log in once but keep only the session, not the password.
    #[arg(long)]
    no_save_raw_credential: bool,
}

#[derive(Args)]
struct DownloadArgs {
    /// Work ids or product urls; comma separated values are accepted.
    #[arg(required = true)]
    items: Vec<String>,

    #[arg(short, long)]
    force: bool,

    #[arg(long)]
    no_extract: bool,

    #[arg(long)]
    keep_extracted_archive: bool,
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(long)]
    keep_extracted_archive: bool,
}

#[derive(Args)]
struct FindArgs {
    #[arg(required = true)]
    ids: Vec<String>,
}

#[derive(Args)]
struct CleanArgs {
    #[arg(short = 'n', long)]
    dry_run: bool,

    #[arg(short, long)]
    yes: bool,
}

#[derive(Args)]
struct PurchasedArgs {
    /// Write the raw purchase list as JSON.
    #[arg(short, long)]
    output: Option<Utf8PathBuf>,

    /// Only works bought within this long, e.g. `2 days`.
    #[arg(long)]
    within: Option<String>,
}

#[derive(Args)]
struct MylistArgs {
    #[command(subcommand)]
    command: MylistCommand,
}

#[derive(Subcommand)]
enum MylistCommand {
    List,
    Create { name: String },
    Rename { id: String, name: String },
    Delete { id: String },
    Add { list: String, item: String },
    Remove { list: String, item: String },
    Reorder {
        id: String,
        #[arg(required = true)]
        items: Vec<String>,
    },
}

#[derive(Serialize)]
struct ConfigSummary {
    config_dir: String,
    management_dir: Option<String>,
    watched_dir: String,
    credential_saved: bool,
    logged_in: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ManagerError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ManagerError) -> u8 {
    match error {
        ManagerError::MissingCredential
        | ManagerError::MissingManagementDir
        | ManagerError::ConfigRead(_)
        | ManagerError::ConfigParse(_)
        | ManagerError::SessionParse(_) => 2,
        ManagerError::AuthenticationFailure(_)
        | ManagerError::Unauthorized(_)
        | ManagerError::Http(_)
        | ManagerError::HttpStatus { .. }
        | ManagerError::SplitPage(_)
        | ManagerError::Mylist(_)
        | ManagerError::ListNotFound(_)
        | ManagerError::Purchases(_) => 3,
        ManagerError::ExtractionTool { .. }
        | ManagerError::MissingTool(_)
        | ManagerError::PartialFailure { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else if cli.debug {
        EnvFilter::new("debug")
    } else if cli.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let store = Store::new(cli.config_dir.as_deref())?;

    match cli.command {
        Commands::Config(args) => run_config(args, &store, output_mode),
        Commands::Download(args) => run_download(args, store, output_mode),
        Commands::Extract(args) => run_extract(args, store, output_mode),
        Commands::Find(args) => run_find(args, store, output_mode),
        Commands::Clean(args) => run_clean(args, store, output_mode),
        Commands::Purchased(args) => run_purchased(args, &store, output_mode),
        Commands::Mylist(args) => run_mylist(args.command, &store, output_mode),
        Commands::Points => run_points(&store, output_mode),
    }
}

fn load_settings(store: &Store) -> Result<Settings, ManagerError> {
    ConfigLoader::resolve(store.config_path().as_std_path())
}

fn build_manager(store: Store, settings: Settings) -> Result<HttpManager, ManagerError> {
    let endpoints = settings.endpoints.clone();
    Ok(Manager::new(
        store,
        settings,
        Downloader::new(HttpDownloadSource, endpoints.clone()),
        HttpAuthenticator::new(endpoints.clone()),
        HttpCatalogClient::new(endpoints)?,
        SystemUnarchiver::new(),
    ))
}

fn run_config(args: ConfigArgs, store: &Store, output_mode: OutputMode) -> miette::Result<()> {
    store.ensure_config_dir()?;
    let config_path = store.config_path();
    let mut config = ConfigLoader::load(config_path.as_std_path())?;
    if let Some(dir) = args.management_dir {
        config.management_dir = Some(dir);
    }
    if let Some(name) = args.watched_dir {
        config.watched_dir = Some(name);
    }
    ConfigLoader::save(config_path.as_std_path(), &config)?;
    let settings = ConfigLoader::resolve_config(config);

    let mut logged_in = false;
    match (args.username, args.password) {
        (Some(username), Some(password)) => {
            let credential = Credential::new(&username, &password);
            if args.no_save_raw_credential {
                store.clear_credential()?;
            } else {
                store.save_credential(&credential)?;
            }
            let authenticator = HttpAuthenticator::new(settings.endpoints.clone());
            let session = authenticator.login(&credential)?;
            store.save_session(&session)?;
            info!(user = %credential.username, "session saved");
            logged_in = true;
        }
        (None, None) => {}
        _ => {
            return Err(miette::Report::msg(
                "username and password must be given together",
            ));
        }
    }

    let summary = ConfigSummary {
        config_dir: store.config_dir().to_string(),
        management_dir: settings.management_dir.as_ref().map(|dir| dir.to_string()),
        watched_dir: settings.watched_dir.clone(),
        credential_saved: store.credential_path().as_std_path().exists(),
        logged_in,
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_json(&summary).into_diagnostic()?,
        OutputMode::Interactive => {
            println!("config dir:     {}", summary.config_dir);
            println!(
                "management dir: {}",
                summary.management_dir.as_deref().unwrap_or("(not set)")
            );
            println!("watched dir:    {}", summary.watched_dir);
            let credential = if summary.credential_saved {
                "saved"
            } else {
                "not saved"
            };
            println!("credential:     {credential}");
            if logged_in {
                println!("logged in, session saved");
            }
        }
    }
    Ok(())
}

fn run_download(args: DownloadArgs, store: Store, output_mode: OutputMode) -> miette::Result<()> {
    let ids = collect_item_ids(&args.items)?;
    let settings = load_settings(&store)?;
    settings.management_dir()?;
    let authenticator = HttpAuthenticator::new(settings.endpoints.clone());
    let session = open_session(&store, &authenticator, None)?;
    let options = DownloadOptions {
        force: args.force,
        extract: !args.no_extract,
        keep_archives: args.keep_extracted_archive,
    };

    let result = match output_mode {
        OutputMode::NonInteractive => {
            let manager = build_manager(store, settings)?;
            let (_, result) = manager.download(session, &ids, &options, &JsonOutput)?;
            JsonOutput::print_download(&result).into_diagnostic()?;
            result
        }
        OutputMode::Interactive => {
            let root = settings.management_dir()?.as_std_path().to_path_buf();
            let mut tui = Tui::new(Operation::Download, Some(&root), &settings.watched_dir);
            let manager = build_manager(store, settings)?;
            let (_, result) =
                tui.run(move |sink| manager.download(session, &ids, &options, sink))?;
            print_download_summary(&result);
            result
        }
    };

    match result.failures() {
        0 => Ok(()),
        failed => Err(ManagerError::PartialFailure { failed }.into()),
    }
}

fn run_extract(args: ExtractArgs, store: Store, output_mode: OutputMode) -> miette::Result<()> {
    let settings = load_settings(&store)?;
    let keep = args.keep_extracted_archive;
    let result = match output_mode {
        OutputMode::NonInteractive => {
            let manager = build_manager(store, settings)?;
            let result = manager.extract(keep, &JsonOutput)?;
            JsonOutput::print_extract(&result).into_diagnostic()?;
            result
        }
        OutputMode::Interactive => {
            let root = settings.management_dir()?.as_std_path().to_path_buf();
            let mut tui = Tui::new(Operation::Extract, Some(&root), &settings.watched_dir);
            let manager = build_manager(store, settings)?;
            let result = tui.run(move |sink| manager.extract(keep, sink))?;
            print_extract_summary(&result);
            result
        }
    };

    match result.failed.len() {
        0 => Ok(()),
        failed => Err(ManagerError::PartialFailure { failed }.into()),
    }
}

fn run_find(args: FindArgs, store: Store, output_mode: OutputMode) -> miette::Result<()> {
    let ids = collect_item_ids(&args.ids)?;
    let settings = load_settings(&store)?;
    let manager = build_manager(store, settings)?;
    let result: FindResult = manager.find(&ids)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_find(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            for item in &result.items {
                let prefix = if item.prefix.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", item.prefix)
                };
                println!("{}{prefix}  {}", item.item_id, item.directory.display());
            }
            let found = result.items.len();
            if found < ids.len() {
                println!("{} of {} not found", ids.len() - found, ids.len());
            }
        }
    }
    Ok(())
}

fn run_clean(args: CleanArgs, store: Store, output_mode: OutputMode) -> miette::Result<()> {
    let settings = load_settings(&store)?;
    let manager = build_manager(store, settings)?;
    let plan = manager.plan_clean()?;

    let result: CleanResult = if args.dry_run || plan.delete.is_empty() {
        plan.dry_run()
    } else {
        let confirmed = match output_mode {
            _ if args.yes => true,
            OutputMode::Interactive => {
                let lines = plan
                    .delete
                    .iter()
                    .map(|item| item.directory.display().to_string())
                    .collect::<Vec<_>>();
                Tui::confirm(
                    &format!("Empty {} watched directories?", lines.len()),
                    &lines,
                )?
            }
            OutputMode::NonInteractive => {
                return Err(miette::Report::msg(
                    "clean needs --yes when running non-interactively",
                ));
            }
        };
        if !confirmed {
            println!("clean cancelled");
            return Ok(());
        }
        manager.clean(&plan)?
    };

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_clean(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            let verb = if result.dry_run { "would clean" } else { "cleaned" };
            for dir in &result.cleaned {
                println!("{verb}: {dir}");
            }
            for dir in &result.skipped {
                println!("skipped: {dir}");
            }
        }
    }
    Ok(())
}

fn run_purchased(
    args: PurchasedArgs,
    store: &Store,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let within = args
        .within
        .as_deref()
        .map(parse_relative_duration)
        .transpose()?;
    let settings = load_settings(store)?;
    let authenticator = HttpAuthenticator::new(settings.endpoints.clone());
    let session = open_session(store, &authenticator, None)?;
    let client = HttpPurchaseClient::new(session, settings.endpoints.clone());
    let purchases = fetch_all_purchases(&client)?;

    if let Some(path) = &args.output {
        let content = serde_json::to_vec_pretty(&purchases).into_diagnostic()?;
        Store::write_bytes_atomic(path.as_std_path(), &content)?;
        info!(path = %path, count = purchases.len(), "purchase list written");
    }

    let ids = match within {
        Some(within) => purchased_within(&purchases, within, Utc::now()),
        None => purchases
            .iter()
            .map(|purchase| purchase.workno.clone())
            .collect(),
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_json(&ids).into_diagnostic()?,
        OutputMode::Interactive => {
            for id in &ids {
                println!("{id}");
            }
        }
    }
    Ok(())
}

fn run_mylist(
    command: MylistCommand,
    store: &Store,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let settings = load_settings(store)?;
    let authenticator = HttpAuthenticator::new(settings.endpoints.clone());
    let session = open_session(store, &authenticator, None)?;
    let editor = MylistEditor::new(session, settings.endpoints.clone());

    let message = match command {
        MylistCommand::List => {
            let lists = editor.lists()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_mylists(&lists).into_diagnostic()?,
                OutputMode::Interactive => print_mylists(&lists),
            }
            return Ok(());
        }
        MylistCommand::Create { name } => {
            let id = editor.create(&name)?;
            format!("created mylist {name} ({id})")
        }
        MylistCommand::Rename { id, name } => {
            editor.rename(&id, &name)?;
            format!("renamed mylist {id} to {name}")
        }
        MylistCommand::Delete { id } => {
            editor.delete_list(&id)?;
            format!("deleted mylist {id}")
        }
        MylistCommand::Add { list, item } => {
            let list = editor.resolve(&list)?;
            let item = parse_item_reference(&item)?;
            editor.add_item(&list.id, &item)?;
            format!("added {item} to {}", list.name)
        }
        MylistCommand::Remove { list, item } => {
            let list = editor.resolve(&list)?;
            let item = parse_item_reference(&item)?;
            editor.remove_item(&list, &item)?;
            format!("removed {item} from {}", list.name)
        }
        MylistCommand::Reorder { id, items } => {
            let list = editor.find_by_id(&id)?;
            let order = items
                .iter()
                .map(|item| parse_item_reference(item).map(|id| id.to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            if editor.reorder(&list, &order)? {
                format!("reordered {}", list.name)
            } else {
                format!("{} is already in that order", list.name)
            }
        }
    };

    match output_mode {
        OutputMode::NonInteractive => {
            JsonOutput::print_json(&serde_json::json!({ "result": true, "message": message }))
                .into_diagnostic()?
        }
        OutputMode::Interactive => println!("{message}"),
    }
    Ok(())
}

fn run_points(store: &Store, output_mode: OutputMode) -> miette::Result<()> {
    let settings = load_settings(store)?;
    let authenticator = HttpAuthenticator::new(settings.endpoints.clone());
    let session = open_session(store, &authenticator, None)?;
    let outcome = click_for_points(&session, &settings.endpoints)?;
    store.save_session(&session)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_points(&outcome).into_diagnostic()?,
        OutputMode::Interactive => match &outcome {
            PointsOutcome::Rewarded { name, japan_time } => {
                println!("got {name} at {japan_time}");
            }
            PointsOutcome::AlreadyClaimed => println!("already drawn today"),
        },
    }
    Ok(())
}

fn print_mylists(lists: &[Mylist]) {
    for list in lists {
        println!("{} {} ({} items)", list.id, list.name, list.item_ids.len());
        for item in &list.item_ids {
            println!("    {item}");
        }
    }
}

fn print_download_summary(result: &DownloadResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}DLSM download summary{reset}");
    println!("{green}Downloaded: {}{reset}", result.downloaded.len());
    println!("{yellow}Skipped: {}{reset}", result.skipped.len());
    if result.relogins > 0 {
        println!("{yellow}Re-logins: {}{reset}", result.relogins);
    }
    for item in &result.skipped {
        println!("{yellow}  = {} ({}){reset}", item.item_id, item.directory);
    }
    for item in &result.downloaded {
        println!("{cyan}  + {} ({} files){reset}", item.item_id, item.files.len());
    }
    for item in &result.failed {
        println!("{red}  ! {}: {}{reset}", item.item_id, item.error);
    }
    if let Some(extract) = &result.extract {
        print_extract_summary(extract);
    }
}

fn print_extract_summary(result: &ExtractResult) {
    let green = "\x1b[32m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    for item in &result.placed {
        let note = if item.replaced { " (replaced)" } else { "" };
        println!("{green}  > {}{note}{reset}", item.directory);
    }
    for item in &result.failed {
        println!("{red}  ! {}: {}{reset}", item.item_id, item.error);
    }
}
