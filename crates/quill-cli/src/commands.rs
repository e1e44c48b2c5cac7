use std::io::BufRead;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use colored::Colorize;
use serde_json::json;
use tracing::{debug, info};

use quill_core::{
    CoreConfig, DocumentUpdate, ErrorKind, NewCollaborator, NewDocument, NewProject, Placement,
    PlacementPolicy, Quill, UploadRequest,
};
use quill_store::blob::reader_from_bytes;
use quill_store::PageRequest;
use quill_tree::{build_tree, FileEntry, TreeNode};
use quill_types::{FileType, Role, UserId};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Tree(args) => cmd_tree(args, cli.format),
        Command::Placement(args) => cmd_placement(args, &config, cli.format),
        Command::Config(args) => cmd_config(args, &config, cli.format),
        Command::Demo(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(cmd_demo(args, config))
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<CoreConfig> {
    match &cli.config {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            CoreConfig::load(path).with_context(|| format!("loading {}", path.display()))
        }
        None => Ok(CoreConfig::default()),
    }
}

fn cmd_tree(args: TreeArgs, format: OutputFormat) -> anyhow::Result<()> {
    let paths = if args.paths.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    } else {
        args.paths
    };

    let tree = build_tree(paths.iter().map(|path| FileEntry {
        id: path.clone(),
        path,
        size: None,
        file_type: FileType::from_path(path).ok(),
    }));
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tree)?),
        OutputFormat::Text => print_tree(&tree),
    }
    Ok(())
}

fn print_tree(tree: &TreeNode) {
    print!("{}", tree.render());
    println!(
        "{} files in {} folders",
        tree.count_files().to_string().bold(),
        tree.count_folders().to_string().bold()
    );
}

fn cmd_placement(
    args: PlacementArgs,
    config: &CoreConfig,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let size = std::fs::metadata(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?
        .len();
    let file_type: FileType = match &args.file_type {
        Some(name) => name.parse()?,
        None => FileType::from_path(&args.file.to_string_lossy())?,
    };
    let policy = PlacementPolicy::new(args.threshold.unwrap_or(config.inline_threshold));
    let placement = policy.decide(file_type, size);

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "file": args.file.display().to_string(),
                "size": size,
                "file_type": file_type,
                "threshold": policy.threshold(),
                "placement": placement,
            }))?
        ),
        OutputFormat::Text => {
            let reason = if file_type.is_binary() {
                format!("{file_type} files are always stored in the blob store")
            } else if placement == Placement::External {
                format!("{size} bytes > {} byte threshold", policy.threshold())
            } else {
                format!("{size} bytes <= {} byte threshold", policy.threshold())
            };
            let shown = match placement {
                Placement::Inline => placement.to_string().green(),
                Placement::External => placement.to_string().yellow(),
            };
            println!("{} {} ({reason})", args.file.display().to_string().bold(), shown);
        }
    }
    Ok(())
}

fn cmd_config(args: ConfigArgs, config: &CoreConfig, format: OutputFormat) -> anyhow::Result<()> {
    if args.check {
        return Ok(());
    }
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => {
            println!("{} configuration valid", "✓".green().bold());
            print!("{}", toml::to_string(config)?);
        }
    }
    Ok(())
}

async fn cmd_demo(args: DemoArgs, config: CoreConfig) -> anyhow::Result<()> {
    let quill = Quill::in_memory(CoreConfig {
        inline_threshold: args.threshold,
        ..config
    })?;
    info!(threshold = args.threshold, "starting in-memory demo session");
    let ada = UserId::new("ada");
    let bob = UserId::new("bob");
    let cy = UserId::new("cy");

    let project = quill
        .projects()
        .create(
            &ada,
            NewProject {
                name: "Thesis".into(),
                description: "Demo project".into(),
                tags: vec!["demo".into()],
            },
        )
        .await?;
    println!("{} Created project {} ({})", "✓".green().bold(), project.name.bold(), project.id.short_id().cyan());

    quill
        .projects()
        .add_collaborator(&project.id, &ada, NewCollaborator::new(bob.clone(), Role::Editor))
        .await?;
    quill
        .projects()
        .add_collaborator(&project.id, &ada, NewCollaborator::new(cy.clone(), Role::Reader))
        .await?;
    println!("  Collaborators: {} (editor), {} (reader)", bob, cy);

    let docs = [
        ("/main.tex", "\\documentclass{article}\n\\input{chapters/intro}\n".to_string()),
        ("/chapters/intro.tex", "Lorem ipsum dolor sit amet. ".repeat(8)),
        ("/refs.bib", "@book{knuth84, title={The TeXbook}}\n".to_string()),
    ];
    let mut main_id = None;
    for (path, body) in docs {
        let doc = quill
            .documents()
            .create(&project.id, &bob, NewDocument::from_path(path, Bytes::from(body))?)
            .await?;
        let placement = if doc.is_externalized() { "external".yellow() } else { "inline".green() };
        println!("  {} {} ({} bytes, {})", "+".green(), path, doc.size, placement);
        main_id.get_or_insert(doc.id);
    }

    let figure = Bytes::from_static(b"\x89PNG\r\n\x1a\n demo");
    let upload = UploadRequest::from_path("/figures/plot.png", figure.len() as u64)?;
    let plot = quill
        .documents()
        .upload_binary(&project.id, &bob, upload, reader_from_bytes(figure))
        .await?;
    println!("  {} {} ({} bytes, {})", "+".green(), plot.path, plot.size, "external".yellow());

    info!(project = %project.id, documents = 4, "demo documents stored");
    let main_id = main_id.context("no documents created")?;
    quill
        .documents()
        .update(&main_id, &bob, DocumentUpdate::content(1, Bytes::from("\\documentclass{book}\n")))
        .await?;
    match quill
        .documents()
        .update(&main_id, &ada, DocumentUpdate::content(1, Bytes::from("stale edit")))
        .await
    {
        Err(e) if e.kind() == ErrorKind::Conflict => {
            println!("  {} stale edit rejected: {}", "✗".red(), e);
        }
        other => anyhow::bail!("expected a version conflict, got {other:?}"),
    }
    match quill
        .documents()
        .create(&project.id, &cy, NewDocument::from_path("/notes.tex", Bytes::from("hi"))?)
        .await
    {
        Err(e) if e.kind() == ErrorKind::AccessDenied => {
            println!("  {} reader write rejected: {}", "✗".red(), e);
        }
        other => anyhow::bail!("expected access denied, got {other:?}"),
    }

    let tree = quill.documents().tree(&project.id, &cy).await?;
    println!("\n{}", "Project tree".bold());
    print_tree(&tree);

    if let Some(link) = quill
        .documents()
        .download_link(&plot.id, &cy, Duration::from_secs(600))
        .await?
    {
        println!("\nDownload link for {}: {}", plot.name, link.url.blue());
    }

    let shared = quill.projects().list_shared(&cy, PageRequest::first(10)).await?;
    println!("Projects shared with {}: {}", cy, shared.total);

    let report = quill.purge_project(&project.id, &ada).await?;
    info!(
        project = %project.id,
        documents = report.documents_removed,
        blobs = report.blobs_released,
        "demo session finished"
    );
    println!(
        "\n{} Purged project: {} documents, {} blobs released",
        "✓".green().bold(),
        report.documents_removed,
        report.blobs_released
    );
    Ok(())
}
