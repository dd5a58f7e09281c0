use std::{env, fs, path::PathBuf};

use config::mm::KERNEL_START;

fn main() {
    println!("cargo:rerun-if-changed=linker.ld");
    if env::var("CARGO_CFG_TARGET_ARCH").as_deref() != Ok("riscv64") {
        return;
    }

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();

    let link_script = fs::read_to_string(PathBuf::from(manifest_dir).join("linker.ld")).unwrap();
    let link_script = link_script.replace("%KERNEL_START%", &KERNEL_START.to_string());

    let dest = PathBuf::from(out_dir).join("linker.ld");
    fs::write(&dest, link_script).unwrap();
    println!("cargo:rustc-link-arg=-T{}", dest.display());
}
