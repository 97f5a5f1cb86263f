//! Generate one controller module per kind template in `templates/`.

#[path = "src/codegen/mod.rs"]
#[allow(dead_code, unused_imports)]
mod codegen;

fn main() {
    let templates = std::path::Path::new("templates");
    println!("cargo:rerun-if-changed={}", templates.display());

    let files = codegen::template_files(templates).expect("could not list kind templates");
    for file in &files {
        println!("cargo:rerun-if-changed={}", file.display());
    }

    let content = codegen::render_directory(templates).expect("could not render kind templates");

    let mut generated = std::path::Path::new(&std::env::var("OUT_DIR").unwrap()).to_path_buf();
    generated.push("controllers.rs");

    std::fs::write(generated, content).expect("could not write out generated controllers");
}
