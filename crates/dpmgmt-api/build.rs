use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

/// Appliance default-certificate generations, by file stem.
const GENERATIONS: [&str; 2] = ["appliance-default-v1", "appliance-default-v2"];

/// Overrides the directory the default certificates are read from.
const CERTS_ENV: &str = "DPMGMT_APPLIANCE_CERTS";

// Embed whichever appliance default certificates are present. None ship
// with the source; the vendor PEMs are dropped into `certs/` (or the
// directory named by DPMGMT_APPLIANCE_CERTS) before building.
fn main() {
    println!("cargo::rerun-if-env-changed={CERTS_ENV}");

    let dir: PathBuf = match std::env::var_os(CERTS_ENV) {
        Some(dir) => dir.into(),
        None => PathBuf::from(std::env::var_os("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set by Cargo"))
            .join("certs"),
    };
    println!("cargo::rerun-if-changed={}", dir.display());

    let mut generated = String::from("pub(super) const BUNDLED: &[(&str, &[u8])] = &[\n");
    for generation in GENERATIONS {
        let path = dir.join(format!("{generation}.pem"));
        println!("cargo::rerun-if-changed={}", path.display());
        if !path.is_file() {
            continue;
        }
        let path = path
            .canonicalize()
            .unwrap_or_else(|e| panic!("failed to resolve {}: {e}", path.display()));
        writeln!(generated, "    ({generation:?}, include_bytes!({:?})),", path.display().to_string())
            .expect("writing to a String cannot fail");
    }
    generated.push_str("];\n");

    let out_dir: PathBuf = std::env::var_os("OUT_DIR").expect("OUT_DIR not set by Cargo").into();
    let out = out_dir.join("bundled_anchors.rs");
    fs::write(&out, generated).unwrap_or_else(|e| panic!("failed to write {}: {e}", out.display()));
}
