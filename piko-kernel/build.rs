fn main() {
    // Only bare-metal builds link with the kernel layout; host builds (unit
    // tests) use the platform defaults.
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os == "none" {
        let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
        println!("cargo:rustc-link-arg=-T{manifest_dir}/kernel.ld");
    }

    println!("cargo:rerun-if-changed=kernel.ld");
}
