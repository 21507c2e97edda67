#![forbid(unsafe_code)]

mod script;

use anyhow::{Context, Result, bail};
use nsfs::{DirEntryType, FsConfig, InodeNumber, Namespace};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize)]
struct ReplayOutput {
    steps: Vec<script::StepReport>,
    failed: usize,
    space: nsfs::SpaceReport,
}

#[derive(Debug, Default)]
struct CommonArgs {
    config: Option<PathBuf>,
    json: bool,
    tree: bool,
    positional: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "replay" => {
            let common = parse_common(args)?;
            let Some(script_path) = common.positional.first() else {
                bail!("replay requires a script path");
            };
            replay_cmd(Path::new(script_path), &common)
        }
        "tree" => {
            let common = parse_common(args)?;
            let mut ns = open_namespace(common.config.as_deref())?;
            if let Some(script_path) = common.positional.first() {
                script::replay(&mut ns, load_script(Path::new(script_path))?);
            }
            print_tree(&ns)
        }
        "free-space" => {
            let common = parse_common(args)?;
            free_space_cmd(&common)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("nsfs-cli\n");
    println!("USAGE:");
    println!("  nsfs-cli replay <script.json> [--config <config.json>] [--json] [--tree]");
    println!("  nsfs-cli tree [<script.json>] [--config <config.json>]");
    println!("  nsfs-cli free-space [--config <config.json>] [--json]");
}

fn parse_common(mut args: impl Iterator<Item = String>) -> Result<CommonArgs> {
    let mut common = CommonArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let Some(path) = args.next() else {
                    bail!("--config requires a path");
                };
                common.config = Some(PathBuf::from(path));
            }
            "--json" => common.json = true,
            "--tree" => common.tree = true,
            flag if flag.starts_with("--") => bail!("unknown flag: {flag}"),
            other => common.positional.push(other.to_owned()),
        }
    }
    Ok(common)
}

fn load_config(path: Option<&Path>) -> Result<FsConfig> {
    let Some(path) = path else {
        return Ok(FsConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn open_namespace(config: Option<&Path>) -> Result<Namespace> {
    let config = load_config(config)?;
    Namespace::new(config).context("failed to format namespace")
}

fn load_script(path: &Path) -> Result<Vec<script::ScriptOp>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    script::parse(&text).with_context(|| format!("invalid script {}", path.display()))
}

fn replay_cmd(script_path: &Path, common: &CommonArgs) -> Result<()> {
    let mut ns = open_namespace(common.config.as_deref())?;
    let ops = load_script(script_path)?;
    let steps = script::replay(&mut ns, ops);
    let failed = steps.iter().filter(|s| !s.ok()).count();

    if common.json {
        let output = ReplayOutput {
            steps,
            failed,
            space: ns.space_report(),
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        for step in &steps {
            match (&step.error, step.ino) {
                (Some(error), _) => println!("[{}] {:?}: error: {error}", step.step, step.op),
                (None, Some(ino)) => println!("[{}] {:?}: ok (ino {ino})", step.step, step.op),
                (None, None) => println!("[{}] {:?}: ok", step.step, step.op),
            }
        }
        println!("{} steps, {failed} failed", steps.len());
        let audit = ns.audit_stats();
        println!(
            "audit: {} appended, {} failed",
            audit.appended, audit.failed
        );
    }

    if common.tree {
        print_tree(&ns)?;
    }
    Ok(())
}

fn free_space_cmd(common: &CommonArgs) -> Result<()> {
    let ns = open_namespace(common.config.as_deref())?;
    let report = ns.space_report();
    if common.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize output")?
        );
    } else {
        println!("block_size: {}", report.block_size);
        println!("total_blocks: {}", report.total_blocks);
        println!("free_blocks: {}", report.free_blocks);
        println!("reserved_blocks: {}", report.reserved_blocks);
        println!("total_inodes: {}", report.total_inodes);
        println!("free_inodes: {}", report.free_inodes);
        println!("available_bytes: {}", report.available_bytes);
    }
    Ok(())
}

fn print_tree(ns: &Namespace) -> Result<()> {
    println!("/");
    print_dir(ns, InodeNumber::ROOT, 1)
}

fn print_dir(ns: &Namespace, dir: InodeNumber, depth: usize) -> Result<()> {
    let entries = ns
        .readdir(dir)
        .with_context(|| format!("failed to read directory {dir}"))?;
    for entry in entries {
        if entry.name == b"." || entry.name == b".." {
            continue;
        }
        let attr = ns
            .getattr(entry.ino)
            .with_context(|| format!("dangling entry for inode {}", entry.ino))?;
        let indent = "  ".repeat(depth);
        let name = String::from_utf8_lossy(&entry.name);
        match entry.kind {
            DirEntryType::Dir => {
                println!("{indent}{name}/ (ino {}, nlink {})", attr.ino, attr.nlink);
                print_dir(ns, entry.ino, depth + 1)?;
            }
            DirEntryType::Symlink => {
                let target = ns.readlink(entry.ino)?;
                println!(
                    "{indent}{name} -> {} (ino {})",
                    String::from_utf8_lossy(&target),
                    attr.ino
                );
            }
            _ => println!(
                "{indent}{name} (ino {}, nlink {}, {:?})",
                attr.ino, attr.nlink, attr.kind
            ),
        }
    }
    Ok(())
}
