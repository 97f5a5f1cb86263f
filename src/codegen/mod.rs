//! Render kind templates into controller modules.
//!
//! Used by the build script to generate `controllers.rs` and by the `codegen` binary to
//! preview the output. Paths in here stay relative so that the build script can include
//! this module on its own.

use std::path::{Path, PathBuf};

use indoc::formatdoc;
use thiserror::Error;

mod emit;
mod template;

pub use template::{
    ArgumentKind, ArgumentTemplate, Function, Hardcoded, KindTemplate, PolicyTemplate,
    SourceTemplate, StateParameterTemplate, WaiterTemplate, WaitersTemplate,
};

#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("could not read template {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse template {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid template {reference}: {reason}")]
    Invalid { reference: String, reason: String },

    #[error("kind {0} is declared by more than one template")]
    Duplicate(String),

    #[error("generated code does not parse: {0}")]
    Syntax(#[source] syn::Error),
}

/// Parse one template; `origin` names it in errors
pub fn parse(raw: &str, origin: &str) -> Result<KindTemplate, CodegenError> {
    serde_yaml::from_str(raw).map_err(|source| CodegenError::Parse {
        path: origin.to_string(),
        source,
    })
}

pub fn load(path: &Path) -> Result<KindTemplate, CodegenError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CodegenError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&raw, &path.display().to_string())
}

/// Every `*.yaml` template in a directory, sorted by file name
pub fn template_files(directory: &Path) -> Result<Vec<PathBuf>, CodegenError> {
    let io = |source| CodegenError::Io {
        path: directory.display().to_string(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory).map_err(io)? {
        let path = entry.map_err(io)?.path();
        if path.extension().map_or(false, |extension| extension == "yaml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Render the controller source for a set of templates.
///
/// Output depends only on the templates, never on the order they are passed in.
pub fn render(templates: &[KindTemplate]) -> Result<String, CodegenError> {
    let mut templates = templates.to_vec();
    templates.sort_by(|a, b| a.function.reference.cmp(&b.function.reference));

    for template in &templates {
        template.validate()?;
    }
    // different references may still share a module, e.g. `k8s.core.v1.x` and `k8s.apps.v1.x`
    let mut modules: Vec<_> = templates.iter().map(KindTemplate::module).collect();
    modules.sort_unstable();
    if let Some(pair) = modules.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(CodegenError::Duplicate(pair[0].to_string()));
    }

    let mut tokens = proc_macro2::TokenStream::new();
    for template in &templates {
        tokens.extend(emit::kind_module(template)?);
    }
    tokens.extend(emit::registry(&templates));

    let ast: syn::File = syn::parse2(tokens).map_err(CodegenError::Syntax)?;
    let header = formatdoc! {"
        // @generated by kube-reconciler from {count} kind template(s).
        // Edit the templates instead of this file.

        ",
        count = templates.len(),
    };

    Ok(header + &prettyplease::unparse(&ast))
}

/// Load and render every template in a directory
pub fn render_directory(directory: &Path) -> Result<String, CodegenError> {
    let templates = template_files(directory)?
        .iter()
        .map(|path| load(path))
        .collect::<Result<Vec<_>, _>>()?;
    render(&templates)
}
