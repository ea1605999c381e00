fn main() {
    // toml-cfg bakes cfg.toml into the binary; rebuild when it changes.
    println!("cargo:rerun-if-changed=cfg.toml");
    println!("cargo:rerun-if-changed=build.rs");
}
