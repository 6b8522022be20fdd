// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Build script: compiles tests/fixtures/shiori_fixture.c into a shared
// library in $OUT_DIR and exports its path as SHIORI_FIXTURE_LIB for the
// native backend tests. The C compiler is found the way `cc` finds one
// (CC / target defaults). Without a compiler the tests skip themselves;
// the crate itself never needs the fixture.

use std::env;
use std::path::{Path, PathBuf};

const FIXTURE_SRC: &str = "tests/fixtures/shiori_fixture.c";

fn library_file_name(target_os: &str) -> &'static str {
    match target_os {
        "windows" => "shiori_fixture.dll",
        "macos" | "ios" => "libshiori_fixture.dylib",
        _ => "libshiori_fixture.so",
    }
}

fn build_fixture(source: &Path, out: &Path) -> Result<(), String> {
    let compiler = cc::Build::new()
        .cargo_metadata(false)
        .warnings(false)
        .try_get_compiler()
        .map_err(|e| format!("no C compiler: {e}"))?;

    let mut cmd = compiler.to_command();
    if compiler.is_like_msvc() {
        cmd.arg("/LD").arg(source).arg(format!("/Fe{}", out.display()));
        if let Ok(out_dir) = env::var("OUT_DIR") {
            cmd.arg(format!("/Fo{out_dir}\\"));
        }
    } else {
        cmd.args(["-shared", "-fPIC", "-o"]).arg(out).arg(source);
    }

    let status = cmd.status().map_err(|e| format!("running {cmd:?}: {e}"))?;
    if !status.success() {
        return Err(format!("{cmd:?} exited with {status}"));
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed={FIXTURE_SRC}");
    println!("cargo:rerun-if-env-changed=CC");

    let Ok(out_dir) = env::var("OUT_DIR") else {
        println!("cargo:warning=OUT_DIR not set; native fixture skipped");
        return;
    };
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let out = PathBuf::from(out_dir).join(library_file_name(&target_os));

    match build_fixture(Path::new(FIXTURE_SRC), &out) {
        Ok(()) => println!("cargo:rustc-env=SHIORI_FIXTURE_LIB={}", out.display()),
        Err(e) => println!("cargo:warning=native fixture not built, native tests will skip: {e}"),
    }
}
