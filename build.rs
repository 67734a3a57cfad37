use std::env;
use std::fs;
use std::path::PathBuf;

const HEADER_NAME: &str = "tsremux.h";

fn main() {
    println!("cargo:rerun-if-changed=src/ffi.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    let Ok(crate_dir) = env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let Some(target_dir) = target_dir() else {
        println!("cargo:warning=cannot locate target directory, skipping C header");
        return;
    };

    let include_dir = target_dir.join("include");
    if let Err(e) = fs::create_dir_all(&include_dir) {
        println!("cargo:warning=cannot create {}: {}", include_dir.display(), e);
        return;
    }

    let config = cbindgen::Config::from_file(PathBuf::from(&crate_dir).join("cbindgen.toml"))
        .unwrap_or_default();

    // header generation problems are warnings only
    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .with_language(cbindgen::Language::C)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(include_dir.join(HEADER_NAME));
        }
        Err(e) => println!("cargo:warning=cbindgen failed: {}", e),
    }
}

fn target_dir() -> Option<PathBuf> {
    // OUT_DIR is target/{debug|release}/build/{crate}-{hash}/out
    PathBuf::from(env::var("OUT_DIR").ok()?)
        .parent()
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .and_then(|p| p.parent())
        .map(|p| p.to_path_buf())
}
