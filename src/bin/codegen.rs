use std::path::PathBuf;

use kube_reconciler::codegen;

/// Print the controllers generated from a template directory, `templates/` by default
fn main() -> anyhow::Result<()> {
    let directory = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from("templates"), PathBuf::from);

    print!("{}", codegen::render_directory(&directory)?);
    Ok(())
}
