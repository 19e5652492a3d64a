//! Compile command: lower a template into a build graph without running it.

use super::load_template;
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_core::builder::{compile as compile_graph, resolve_context, Op};
use kiln_core::Config;
use std::path::Path;

pub fn compile(template: &Path, output: Option<&Path>, settings: &Config) -> Result<()> {
    let mut config = load_template(template)?;
    settings.apply_defaults(&mut config);

    eprintln!("{} Resolving build context", "[1/3]".bold().blue());
    let context_dir =
        resolve_context(&config.provisioners).with_context(|| "Failed to resolve build context")?;
    eprintln!("  {}", context_dir.display().to_string().green());

    eprintln!("{} Compiling {} provisioner(s)", "[2/3]".bold().blue(), config.provisioners.len());
    let definition = compile_graph(&config, &context_dir)
        .and_then(|state| state.marshal())
        .with_context(|| format!("Failed to compile {}", config.name))?;

    let runs = definition.ops.iter().filter(|op| matches!(op.op, Op::Exec(_))).count();
    let copies = definition.ops.iter().filter(|op| matches!(op.op, Op::Copy(_))).count();
    eprintln!(
        "  {} ops ({} run, {} copy) for {}",
        definition.ops.len().to_string().yellow(),
        runs,
        copies,
        definition.platform.to_string().cyan()
    );

    eprintln!("{} Writing graph", "[3/3]".bold().blue());
    let json =
        serde_json::to_string_pretty(&definition).with_context(|| "Failed to serialize graph")?;

    match output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write graph: {}", path.display()))?;
            eprintln!("  {} {}", "Wrote".green(), path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
