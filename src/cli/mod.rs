//! WC-018: CLI subcommands: init, validate, merge, generate, run, payload,
//! schema, completions.

use crate::core::actionfile::{ActionSource, DirectorySource, NoSource};
use crate::core::codegen::Rendered;
use crate::core::compiler::{CompileOptions, Compiler};
use crate::core::payload::PublishPayload;
use crate::core::types::{Lifecycle, Target, WindFile};
use crate::core::{parser, validator};
use crate::transport::{self, docker, Runner};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "windc",
    version,
    about = "Windfile compiler: one declarative CI pipeline, rendered for local bash, Jenkins and Bamboo"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter windfile
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a windfile without resolving external actions
    Validate {
        /// Path to the windfile
        #[arg(short, long, default_value = "windfile.yaml")]
        file: PathBuf,
    },

    /// Splice external actions in and print the merged windfile
    Merge {
        /// Path to the windfile
        #[arg(short, long, default_value = "windfile.yaml")]
        file: PathBuf,

        /// Directory holding actionfiles referenced by `use`
        #[arg(long)]
        actions_dir: Option<PathBuf>,
    },

    /// Render the pipeline for one CI system
    Generate {
        /// Path to the windfile
        #[arg(short, long, default_value = "windfile.yaml")]
        file: PathBuf,

        /// cli, jenkins or bamboo
        #[arg(short, long, default_value = "cli")]
        target: Target,

        /// Run the target's syntax check on the output
        #[arg(long)]
        check: bool,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Directory holding actionfiles referenced by `use`
        #[arg(long)]
        actions_dir: Option<PathBuf>,
    },

    /// Render for cli and execute the script
    Run {
        /// Path to the windfile
        #[arg(short, long, default_value = "windfile.yaml")]
        file: PathBuf,

        /// Lifecycle phase handed to the script
        #[arg(long)]
        phase: Option<Lifecycle>,

        /// Run with local bash instead of a worker container
        #[arg(long)]
        local: bool,

        /// Directory holding actionfiles referenced by `use`
        #[arg(long)]
        actions_dir: Option<PathBuf>,
    },

    /// Print the JSON body for publishing a merged windfile
    Payload {
        /// Path to the windfile
        #[arg(short, long, default_value = "windfile.yaml")]
        file: PathBuf,

        /// CI server URL
        #[arg(long)]
        url: String,

        /// API token
        #[arg(long)]
        token: String,

        #[arg(long)]
        username: Option<String>,

        /// Directory holding actionfiles referenced by `use`
        #[arg(long)]
        actions_dir: Option<PathBuf>,
    },

    /// Print the windfile JSON schema
    Schema,

    /// Print shell completions
    Completions {
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Merge { file, actions_dir } => cmd_merge(&file, actions_dir.as_deref()),
        Commands::Generate {
            file,
            target,
            check,
            output,
            actions_dir,
        } => cmd_generate(
            &file,
            target,
            check,
            output.as_deref(),
            actions_dir.as_deref(),
        ),
        Commands::Run {
            file,
            phase,
            local,
            actions_dir,
        } => cmd_run(&file, phase, local, actions_dir.as_deref()),
        Commands::Payload {
            file,
            url,
            token,
            username,
            actions_dir,
        } => cmd_payload(&file, &url, &token, username, actions_dir.as_deref()),
        Commands::Schema => cmd_schema(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "windc", &mut std::io::stdout());
            Ok(())
        }
    }
}

const STARTER: &str = r#"api: v0.0.1
metadata:
  name: my-pipeline
  description: "Compiled by windc"
  author: me
  targets: [cli, jenkins, bamboo]
  id: PROJ-PLAN

environment:
  GREETING: hello

actions:
  build:
    script: |
      echo "${GREETING} from build"
  cleanup:
    script: echo done
    runAlways: true
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let windfile = path.join("windfile.yaml");
    if windfile.exists() {
        return Err(format!("{} already exists", windfile.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&windfile, STARTER)
        .map_err(|e| format!("cannot write {}: {}", windfile.display(), e))?;

    println!("Initialized windc project at {}", path.display());
    println!("  Created: {}", windfile.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let windfile = load_validated(file)?;
    let external = windfile.actions.values().filter(|a| a.is_external()).count();
    println!(
        "OK: {} ({} actions, {} repositories)",
        windfile.metadata.name,
        windfile.actions.len(),
        windfile.repositories.len()
    );
    if external > 0 {
        println!("  {} action(s) resolved at merge time", external);
    }
    Ok(())
}

fn load_validated(file: &Path) -> Result<WindFile, String> {
    let raw = parser::parse_document_file(file).map_err(|e| e.to_string())?;
    validator::validate(&raw, &CompileOptions::default()).map_err(|e| e.to_string())
}

fn action_source(actions_dir: Option<&Path>) -> Box<dyn ActionSource> {
    match actions_dir {
        Some(dir) => Box::new(DirectorySource::new(dir)),
        None => Box::new(NoSource),
    }
}

fn merge_file(file: &Path, actions_dir: Option<&Path>) -> Result<WindFile, String> {
    let raw = parser::parse_document_file(file).map_err(|e| e.to_string())?;
    let source = action_source(actions_dir);
    let (merged, _) = Compiler::default()
        .merge(&raw, source.as_ref())
        .map_err(|e| e.to_string())?;
    Ok(merged)
}

fn cmd_merge(file: &Path, actions_dir: Option<&Path>) -> Result<(), String> {
    let merged = merge_file(file, actions_dir)?;
    let text = serde_yaml_ng::to_string(&merged).map_err(|e| format!("cannot serialize: {}", e))?;
    print!("{}", text);
    Ok(())
}

fn render(
    file: &Path,
    target: Target,
    check: bool,
    actions_dir: Option<&Path>,
) -> Result<Rendered, String> {
    let raw = parser::parse_document_file(file).map_err(|e| e.to_string())?;
    let source = action_source(actions_dir);
    let compiler = Compiler::new(CompileOptions {
        syntax_check: check,
        ..CompileOptions::default()
    });
    let compilation = compiler
        .compile(&raw, target, source.as_ref())
        .map_err(|e| e.to_string())?;
    Ok(compilation.rendered)
}

fn report(rendered: &Rendered) {
    for name in &rendered.unresolved {
        eprintln!("warning: ${{{}}} is not defined; left for the shell", name);
    }
    if let Some(w) = &rendered.warning {
        eprintln!("warning: {}", w);
    }
}

fn cmd_generate(
    file: &Path,
    target: Target,
    check: bool,
    output: Option<&Path>,
    actions_dir: Option<&Path>,
) -> Result<(), String> {
    let rendered = render(file, target, check, actions_dir)?;
    report(&rendered);
    match output {
        Some(out) => {
            std::fs::write(out, &rendered.text)
                .map_err(|e| format!("cannot write {}: {}", out.display(), e))?;
            println!(
                "Wrote {} ({} for {})",
                out.display(),
                rendered.fingerprint(),
                target
            );
        }
        None => print!("{}", rendered.text),
    }
    Ok(())
}

fn cmd_run(
    file: &Path,
    phase: Option<Lifecycle>,
    local: bool,
    actions_dir: Option<&Path>,
) -> Result<(), String> {
    let merged = merge_file(file, actions_dir)?;
    let rendered = render(file, Target::Cli, false, actions_dir)?;
    report(&rendered);

    let runner = if local {
        Runner::Local
    } else {
        Runner::Container {
            image: docker::worker_image(merged.metadata.docker.as_ref()),
        }
    };
    let phase = phase.map(|p| p.to_string()).unwrap_or_default();
    tracing::info!(?runner, phase = phase.as_str(), "running pipeline");

    let code = transport::run_script(&rendered.text, &phase, &runner)?;
    if code != 0 {
        return Err(format!("pipeline failed with exit code {}", code));
    }
    Ok(())
}

fn cmd_payload(
    file: &Path,
    url: &str,
    token: &str,
    username: Option<String>,
    actions_dir: Option<&Path>,
) -> Result<(), String> {
    let merged = merge_file(file, actions_dir)?;
    let payload = PublishPayload::new(&merged, url, username, token)?;
    println!("{}", payload.to_json()?);
    Ok(())
}

fn cmd_schema() -> Result<(), String> {
    let schema = schemars::schema_for!(WindFile);
    let text = serde_json::to_string_pretty(&schema)
        .map_err(|e| format!("cannot serialize schema: {}", e))?;
    println!("{}", text);
    Ok(())
}
