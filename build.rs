//! Build script - stages the linker script for embedded builds so the
//! linker can find it at link time.  Host (test) builds skip it.

use std::env;
use std::fs;
use std::path::PathBuf;

fn main() {
    // Only firmware builds link against memory.x.
    if env::var_os("CARGO_FEATURE_EMBEDDED").is_some() {
        let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
        fs::copy("memory.x", out_dir.join("memory.x")).unwrap();
        println!("cargo:rustc-link-search={}", out_dir.display());
    }

    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");
}
