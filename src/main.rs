use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use is_terminal::IsTerminal;

mod config;
mod diff;
mod document;
mod error;
mod locator;
mod logging;
mod mode_block;
mod mutator;
mod position;
mod safety;
mod saves;
mod scanner;
mod transform;

use config::{ConfigFile, PatchOptions, Profile, Variant, load_config};
use document::Document;
use error::PatchError;
use logging::PatchLog;
use safety::CommitRequest;

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        if let Some(PatchError::SaveNotFound {
            suggestion: Some(path),
            ..
        }) = err.downcast_ref::<PatchError>()
        {
            eprintln!("did you mean {}?", path.display());
        }
        let code = err
            .downcast_ref::<PatchError>()
            .map(PatchError::exit_code)
            .unwrap_or(1);
        process::exit(code);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Patch(cmd) => handle_patch(cmd),
        Command::Backups(cmd) => handle_backups(cmd),
        Command::Restore(cmd) => handle_restore(cmd),
    }
}

fn handle_patch(cmd: PatchCommand) -> Result<()> {
    let file = match &cmd.config {
        Some(path) => load_config(path)?,
        None => ConfigFile::default(),
    };
    let save_arg = cmd
        .save
        .clone()
        .or_else(|| file.save.clone())
        .context("no save given; pass --save or set `save` in the config file")?;
    if !cmd.enable && !cmd.disable && file.enable.is_none() {
        bail!(
            "no mode state given; pass --enable or --disable, or set `enable` in the config file"
        );
    }
    let options = merge_options(file.into_options(), &cmd);
    let save = saves::resolve_save(&save_arg)?;
    let log = PatchLog::beside(&save);

    print_patch_summary(&save, &options);
    let result = patch_save(&save, &options, &log, cmd.context);
    if let Err(err) = &result {
        log.error("patch", &format!("{err:#}"));
    }
    result
}

fn merge_options(mut options: PatchOptions, cmd: &PatchCommand) -> PatchOptions {
    if cmd.enable {
        options.enable = true;
    }
    if cmd.disable {
        options.enable = false;
    }
    if let Some(profile) = cmd.profile {
        options.profile = profile;
    }
    if cmd.no_entity_effects {
        options.entity_effects = false;
    }
    if !cmd.variants.is_empty() {
        options.variants = cmd.variants.clone();
    }
    if let Some(retention) = cmd.retention {
        options.retention = retention;
    }
    options.dry_run |= cmd.dry_run;
    options
}

fn print_patch_summary(save: &Path, options: &PatchOptions) {
    println!("=== wardenpatch ===");
    println!("save: {}", save.display());
    println!(
        "mode: {}",
        if options.enable { "enable" } else { "disable" }
    );
    println!("profile: {:?}", options.profile);
    println!("entity effects: {}", options.entity_effects);
    if !options.variants.is_empty() {
        println!("variants: {:?}", options.variants);
    }
    println!("retention: {}", options.retention);
    if options.dry_run {
        println!("dry-run: no files will be written");
    }
    println!("---");
}

fn patch_save(save: &Path, options: &PatchOptions, log: &PatchLog, context: usize) -> Result<()> {
    let bytes = fs::read(save).with_context(|| format!("reading {}", save.display()))?;
    let original = Document::from_bytes(&bytes)?;
    let outcome = transform::run_patch(&original, options)?;

    println!(
        "{} ids: {}.i={} {}.u={}",
        options.vocabulary.entity_type,
        options.vocabulary.entity_type,
        outcome.ids.0,
        options.vocabulary.entity_type,
        outcome.ids.1
    );
    for note in outcome.notes() {
        println!("  {note}");
    }
    for warning in &outcome.warnings {
        log.warn("relocate", warning);
    }

    let new_text = outcome.document.render();
    if new_text.as_bytes() == bytes.as_slice() {
        println!("no changes for {}", save.display());
        log.info("no-op", "document already in requested state");
        return Ok(());
    }

    let summary = diff::summarize(&original, &outcome.document);
    println!("--- preview: {} ---", save.display());
    diff::print_diff(&original, &outcome.document, context);
    println!("{summary}");

    if options.dry_run {
        println!("dry-run: rerun without --dry-run to write this change.");
        log.info("dry-run", &summary.to_string());
        return Ok(());
    }

    let report = safety::commit(&CommitRequest {
        path: save,
        original_len: bytes.len(),
        new_text: &new_text,
        enabling: options.enable,
        retention: options.retention,
        retry: options.retry,
    })?;

    println!(
        "backup saved: {} -> {}",
        save.display(),
        report.backup.path.display()
    );
    for pruned in &report.pruned {
        println!("pruned old backup {}", pruned.display());
    }
    match &report.thumbnail {
        Ok(true) => println!("thumbnail refreshed"),
        Ok(false) => {}
        Err(err) => log.warn("thumbnail", &format!("thumbnail refresh failed: {err}")),
    }
    println!("applied {}", save.display());
    log.info("applied", &summary.to_string());
    Ok(())
}

fn handle_backups(cmd: BackupsCommand) -> Result<()> {
    let save = saves::resolve_save(&cmd.save)?;
    let entries = safety::list_backups(&save)?;
    if entries.is_empty() {
        println!("no backups for {}", save.display());
        return Ok(());
    }
    print_backups(&entries);
    Ok(())
}

fn print_backups(entries: &[safety::BackupEntry]) {
    for (idx, entry) in entries.iter().enumerate() {
        let thumb = if entry.thumbnail.is_some() {
            " [+thumbnail]"
        } else {
            ""
        };
        println!(
            "  {:>2}. {}  {}{thumb}",
            idx + 1,
            entry.display_time(),
            entry.path.display()
        );
    }
}

fn handle_restore(cmd: RestoreCommand) -> Result<()> {
    let save = saves::resolve_save(&cmd.save)?;
    let log = PatchLog::beside(&save);
    let entries = safety::list_backups(&save)?;
    if entries.is_empty() {
        bail!(PatchError::BackupNotFound {
            path: save,
            index: cmd.index.unwrap_or(1),
        });
    }

    let index = match cmd.index {
        Some(index) => index,
        None if cmd.yes => 1,
        None if io::stdin().is_terminal() => {
            print_backups(&entries);
            prompt_index(entries.len())?
        }
        None => return Err(PatchError::Cancelled.into()),
    };

    let retry = config::RetryPolicy::default();
    match safety::restore_backup(&save, index, cmd.retention, retry) {
        Ok(report) => {
            if let Some(backup) = &report.backup {
                println!(
                    "backup saved: {} -> {}",
                    save.display(),
                    backup.path.display()
                );
            }
            for pruned in &report.pruned {
                println!("pruned old backup {}", pruned.display());
            }
            let source = report.restored.path.display();
            println!("restored {} from {source}", save.display());
            log.info("restore", &format!("restored from {source}"));
            Ok(())
        }
        Err(err) => {
            log.error("restore", &format!("{err:#}"));
            Err(err)
        }
    }
}

fn prompt_index(count: usize) -> Result<usize> {
    loop {
        print!("Restore which backup? [1-{count}, q to quit]: ");
        io::stdout().flush()?;
        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Err(PatchError::Cancelled.into());
        }
        let answer = input.trim().to_lowercase();
        if answer == "q" || answer == "quit" {
            return Err(PatchError::Cancelled.into());
        }
        match answer.parse::<usize>() {
            Ok(index) if (1..=count).contains(&index) => return Ok(index),
            _ => println!("Please enter a number between 1 and {count}, or q."),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "wardenpatch",
    version,
    about = "Toggle warden mode in a prison save without losing data"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enable or disable the mode in a save.
    Patch(PatchCommand),
    /// List backups of a save, newest first.
    Backups(BackupsCommand),
    /// Restore a save from one of its backups.
    Restore(RestoreCommand),
}

#[derive(Debug, Args)]
struct PatchCommand {
    #[arg(long, value_name = "PATH", value_hint = ValueHint::AnyPath)]
    save: Option<PathBuf>,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        conflicts_with = "disable",
        required_unless_present_any = ["disable", "config"]
    )]
    enable: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    disable: bool,
    #[arg(long, value_enum)]
    profile: Option<Profile>,
    #[arg(long = "no-entity-effects", action = ArgAction::SetTrue)]
    no_entity_effects: bool,
    #[arg(long = "variant", value_enum, value_name = "NAME")]
    variants: Vec<Variant>,
    #[arg(long, value_name = "N")]
    retention: Option<usize>,
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 3)]
    context: usize,
}

#[derive(Debug, Args)]
struct BackupsCommand {
    #[arg(long, value_name = "PATH", value_hint = ValueHint::AnyPath)]
    save: PathBuf,
}

#[derive(Debug, Args)]
struct RestoreCommand {
    #[arg(long, value_name = "PATH", value_hint = ValueHint::AnyPath)]
    save: PathBuf,
    /// 1 is the newest backup.
    #[arg(long, value_name = "N")]
    index: Option<usize>,
    /// Restore the newest backup without asking.
    #[arg(long = "yes", action = ArgAction::SetTrue)]
    yes: bool,
    /// Backups to keep once the current save has been backed up.
    #[arg(long, value_name = "N", default_value_t = config::DEFAULT_RETENTION)]
    retention: usize,
}
