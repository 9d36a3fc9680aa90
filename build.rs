use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Report which optional decoder plugins are compiled in
    let mut plugins = Vec::new();

    if env::var("CARGO_FEATURE_HEIF").is_ok() {
        plugins.push("HEIF/HEIC (libheif)");
    }

    if plugins.is_empty() {
        println!("cargo:warning=Building without optional decoder plugins (HEIF/HEIC uploads will be rejected)");
    } else {
        println!("cargo:warning=Decoder plugins enabled: {}", plugins.join(", "));
    }
}
