use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command as GitCommand,
};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use devnotes::core::{BlockType, Document};
use devnotes::editor::{self, EditContext};
use devnotes::format::{format_document, format_section};
use devnotes::migrate;
use devnotes::parser::parse_document;
use devnotes::search::Search;

const NOTES_FILE_NAME: &str = "dev-notes.md";
const NOTES_FILE_ENV: &str = "DEVNOTES_FILE";

#[derive(Debug, Parser)]
#[command(
    name = "devnotes",
    about = "Shared developer scratchpad kept in a markdown file",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Notes file to use (overrides DEVNOTES_FILE and discovery).
    #[arg(long, global = true)]
    file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Add a task to today's Todo block.
    Add(ContentArgs),
    /// Add a note to today's Notes block.
    Note(ContentArgs),
    /// Add an idea to today's Ideas block.
    Idea(ContentArgs),
    /// Mark the first open task containing TEXT as complete.
    Done {
        /// Substring of the task to complete (case-sensitive).
        text: String,
    },
    /// Delete the first item containing TEXT.
    Delete {
        /// Substring of the item to delete (case-sensitive).
        text: String,
    },
    /// Move the first open task containing TEXT to today's Todo block.
    Carry(CarryArgs),
    /// Search all items by case-insensitive substring.
    Search(SearchArgs),
    /// Print today's section.
    Today,
    /// Print the whole notes file.
    List(ListArgs),
    /// Rewrite a legacy-format notes file into the current layout.
    Migrate,
}

#[derive(Debug, Args)]
struct ContentArgs {
    /// Content of the new item.
    text: String,
    /// Branch label for the subsection; defaults to the current git branch.
    #[arg(long)]
    branch: Option<String>,
}

#[derive(Debug, Args)]
struct CarryArgs {
    /// Substring of the task to carry (case-sensitive).
    text: String,
    /// Branch label for today's subsection; defaults to the current git branch.
    #[arg(long)]
    branch: Option<String>,
}

#[derive(Debug, Args)]
struct SearchArgs {
    /// Substring to look for.
    query: String,
    /// Emit hits as JSON instead of text lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    /// Emit the parsed document as JSON instead of markdown.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = resolve_path(cli.file.as_deref())?;
    if cli.verbose {
        eprintln!("using notes file {}", path.display());
    }
    match cli.command {
        Commands::Add(args) => handle_insert(&path, BlockType::Todo, args, cli.verbose),
        Commands::Note(args) => handle_insert(&path, BlockType::Notes, args, cli.verbose),
        Commands::Idea(args) => handle_insert(&path, BlockType::Ideas, args, cli.verbose),
        Commands::Done { text } => handle_done(&path, &text, cli.verbose),
        Commands::Delete { text } => handle_delete(&path, &text, cli.verbose),
        Commands::Carry(args) => handle_carry(&path, args, cli.verbose),
        Commands::Search(args) => handle_search(&path, args, cli.verbose),
        Commands::Today => handle_today(&path, cli.verbose),
        Commands::List(args) => handle_list(&path, args, cli.verbose),
        Commands::Migrate => handle_migrate(&path, cli.verbose),
    }
}

/* ----------------------------- File resolution ----------------------------- */

fn resolve_path(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path.to_path_buf());
    }
    if let Ok(value) = env::var(NOTES_FILE_ENV) {
        if !value.is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    let cwd = env::current_dir().context("resolving the current directory")?;
    Ok(discover_notes_file(&cwd))
}

/// Walk up from `start` looking for an existing notes file, so the command
/// works from anywhere inside a checkout. Falls back to a new file in `start`.
fn discover_notes_file(start: &Path) -> PathBuf {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(NOTES_FILE_NAME);
        if candidate.is_file() {
            return candidate;
        }
        dir = d.parent();
    }
    start.join(NOTES_FILE_NAME)
}

fn load_document(path: &Path, verbose: bool) -> Result<Document> {
    if !path.exists() {
        if verbose {
            eprintln!("{} not found, starting from the seed document", path.display());
        }
        return Ok(Document::seeded());
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(parse_document(&text))
}

fn save_document(path: &Path, doc: &Document) -> Result<()> {
    fs::write(path, format_document(doc)).with_context(|| format!("writing {}", path.display()))
}

/* ----------------------------- Invocation context ----------------------------- */

fn edit_context(branch: Option<String>, verbose: bool) -> EditContext {
    let date = Local::now().format("%Y-%m-%d").to_string();
    let handle = env::var("USER").unwrap_or_else(|_| "dev".to_string());
    let branch = branch.unwrap_or_else(|| current_git_branch().unwrap_or_default());
    if verbose {
        eprintln!("editing as @{handle} on {date} (branch {branch:?})");
    }
    EditContext::new(date, handle, branch)
}

fn current_git_branch() -> Option<String> {
    let output = GitCommand::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8(output.stdout).ok()?;
    let branch = branch.trim();
    // Detached heads report "HEAD"; treat that as no branch.
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch.to_string())
    }
}

/* ------------------------------- Handlers ------------------------------- */

fn handle_insert(path: &Path, kind: BlockType, args: ContentArgs, verbose: bool) -> Result<()> {
    let mut doc = load_document(path, verbose)?;
    let ctx = edit_context(args.branch, verbose);
    editor::insert(&mut doc, &ctx, kind, &args.text)?;
    save_document(path, &doc)?;
    let noun = match kind {
        BlockType::Todo => "Task",
        BlockType::Notes => "Note",
        BlockType::Ideas => "Idea",
    };
    println!("{noun} added: {}", args.text.trim());
    Ok(())
}

fn handle_done(path: &Path, text: &str, verbose: bool) -> Result<()> {
    let mut doc = load_document(path, verbose)?;
    editor::mark_complete(&mut doc, text)?;
    save_document(path, &doc)?;
    println!("Task containing '{text}' marked as complete");
    Ok(())
}

fn handle_delete(path: &Path, text: &str, verbose: bool) -> Result<()> {
    let mut doc = load_document(path, verbose)?;
    editor::delete(&mut doc, text)?;
    save_document(path, &doc)?;
    println!("Item containing '{text}' deleted");
    Ok(())
}

fn handle_carry(path: &Path, args: CarryArgs, verbose: bool) -> Result<()> {
    let mut doc = load_document(path, verbose)?;
    let ctx = edit_context(args.branch, verbose);
    editor::carry_forward(&mut doc, &ctx, &args.text)?;
    save_document(path, &doc)?;
    println!("Task containing '{}' carried forward to {}", args.text, ctx.date);
    Ok(())
}

fn handle_search(path: &Path, args: SearchArgs, verbose: bool) -> Result<()> {
    let doc = load_document(path, verbose)?;
    let search = Search::new(&doc, &args.query)?;
    if args.json {
        let hits: Vec<_> = search.iter().collect();
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    let mut found = false;
    for hit in search.iter() {
        found = true;
        if hit.branch.is_empty() {
            println!("{} @{} [{}] {}", hit.date, hit.handle, hit.block, hit.text);
        } else {
            println!(
                "{} @{}/{} [{}] {}",
                hit.date, hit.handle, hit.branch, hit.block, hit.text
            );
        }
    }
    if !found {
        println!("No matches for '{}'", args.query);
    }
    Ok(())
}

fn handle_today(path: &Path, verbose: bool) -> Result<()> {
    let doc = load_document(path, verbose)?;
    let date = Local::now().format("%Y-%m-%d").to_string();
    match doc.section(&date) {
        Some(section) => print!("{}", format_section(section)),
        None => println!("No entries for {date}"),
    }
    Ok(())
}

fn handle_list(path: &Path, args: ListArgs, verbose: bool) -> Result<()> {
    let doc = load_document(path, verbose)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print!("{}", format_document(&doc));
    }
    Ok(())
}

fn handle_migrate(path: &Path, verbose: bool) -> Result<()> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let migrated = migrate::migrate(&text);
    if verbose && migrated == text {
        eprintln!("{} already in the current layout", path.display());
    }
    fs::write(path, &migrated).with_context(|| format!("writing {}", path.display()))?;
    println!("Migrated {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn discovery_walks_up_to_an_existing_notes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let notes = dir.path().join(NOTES_FILE_NAME);
        fs::write(&notes, "# Dev Notes\n").expect("write notes");
        let nested = dir.path().join("src").join("deep");
        fs::create_dir_all(&nested).expect("mkdir");

        assert_eq!(discover_notes_file(&nested), notes);
    }

    #[test]
    fn discovery_falls_back_to_the_start_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("work");
        fs::create_dir_all(&nested).expect("mkdir");

        assert_eq!(
            discover_notes_file(&nested),
            nested.join(NOTES_FILE_NAME)
        );
    }

    #[test]
    fn missing_file_loads_as_the_seed_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(NOTES_FILE_NAME);

        let doc = load_document(&path, false).expect("load");
        assert_eq!(doc, Document::seeded());

        save_document(&path, &doc).expect("save");
        let text = fs::read_to_string(&path).expect("read back");
        assert!(text.starts_with("# Dev Notes\n"));
        assert!(text.contains("## Project Context"));
    }

    #[test]
    fn done_command_flips_a_task_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(NOTES_FILE_NAME);
        let mut file = fs::File::create(&path).expect("create");
        write!(
            file,
            "## 2025-10-25\n\n### alice (@alice)\n#### Todo\n- [ ] Fix login bug\n"
        )
        .expect("write");

        handle_done(&path, "login", false).expect("done");

        let text = fs::read_to_string(&path).expect("read back");
        assert!(text.contains("- [x] Fix login bug"));
    }

    #[test]
    fn migrate_command_rewrites_legacy_layout_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(NOTES_FILE_NAME);
        fs::write(
            &path,
            "# Dev Notes\n\n## 2025-10-22 (@alice)\n### Todo\n- [ ] old style\n",
        )
        .expect("write");

        handle_migrate(&path, false).expect("migrate");

        let text = fs::read_to_string(&path).expect("read back");
        assert!(text.contains("## 2025-10-22\n"));
        assert!(text.contains("### alice (@alice)"));
        assert!(text.contains("#### Todo"));
        assert!(text.contains("- [ ] old style"));
    }
}
