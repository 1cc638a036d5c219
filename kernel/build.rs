fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    // Linker script only for the bare-metal image, never for host tests
    if os == "none" && arch == "x86_64" {
        println!("cargo:rustc-link-arg-bin=kernel=-T{}/linker-x86_64.ld", manifest_dir);
    }

    println!("cargo:rerun-if-changed=linker-x86_64.ld");
}
