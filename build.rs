use std::env;
use std::fs;
use std::path::Path;

use itertools::Itertools;

/// One variant is generated per module of `meshlink` that reports its own
/// errors. Keep this list in sync with `src/rtp/*/mod.rs`.
const MODULES: &[&str] = &[
    "Error",
    "Config",
    "Identity",
    "Crypto",
    "Codec",
    "Timer",
    "Reactor",
    "Transport",
    "Handshake",
    "Session",
    "Service",
    "Router",
    "Store",
    "MsgClient",
    "MsgC2s",
    "MsgServer",
];

fn main() {
    let out_dir = env::var("OUT_DIR").unwrap();
    let dest = Path::new(&out_dir).join("error_kind.rs");

    let variants = MODULES.iter().map(|m| format!("    {},", m)).join("\n");

    let contents = format!(
        "/// The different sources of error within `meshlink`.\n\
         #[derive(Debug, Copy, Clone, Eq, PartialEq)]\n\
         pub enum ErrorKind {{\n{}\n}}\n",
        variants,
    );

    fs::write(&dest, contents).expect("failed to write error_kind.rs");

    println!("cargo:rerun-if-changed=build.rs");
}
