use cbindgen::DocumentationStyle;
use std::env;
use std::path::PathBuf;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let output_file: PathBuf = [
        crate_dir.as_ref(),
        "..",
        "target",
        env::var("PROFILE").expect("PROFILE missing").as_ref(),
        "stdiovfs.h",
    ]
    .iter()
    .collect();

    let config = cbindgen::Config {
        language: cbindgen::Language::C,
        include_guard: Some(String::from("STDIO_VFS")),
        documentation_style: DocumentationStyle::Doxy,
        sys_includes: vec![String::from("stdint.h"), String::from("stddef.h")],
        ..Default::default()
    };

    cbindgen::generate_with_config(&crate_dir, config)
        .unwrap()
        .write_to_file(output_file);
}
