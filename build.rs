use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const KEY_PREFIX: &str = "CVWATCH_";
const TEST_MODULE: &str = "mod tests {";

type KeySources = BTreeMap<String, BTreeSet<String>>;

fn source_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "rs") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Whole string literals naming a runtime variable. Test modules and
/// compile-time `env!` names are not scanned.
fn runtime_keys(source: &str) -> Vec<&str> {
    let shipped = source
        .find(TEST_MODULE)
        .map_or(source, |cut| &source[..cut]);
    let quoted_prefix = format!("\"{KEY_PREFIX}");
    let mut keys = Vec::new();
    for (start, _) in shipped.match_indices(&quoted_prefix) {
        if shipped[..start].trim_end().ends_with("env!(") {
            continue;
        }
        let rest = &shipped[start + 1..];
        let len = rest
            .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
            .unwrap_or(rest.len());
        if len > KEY_PREFIX.len() && rest[len..].starts_with('"') {
            keys.push(&rest[..len]);
        }
    }
    keys
}

fn scan(root: &Path) -> io::Result<KeySources> {
    let mut found = KeySources::new();
    for file in source_files(root)? {
        let source = fs::read_to_string(&file)?;
        let label = file
            .strip_prefix(root)
            .unwrap_or(&file)
            .display()
            .to_string();
        for key in runtime_keys(&source) {
            found
                .entry(key.to_string())
                .or_default()
                .insert(label.clone());
        }
    }
    Ok(found)
}

fn write_allowlist(found: &KeySources, out: &Path) -> io::Result<()> {
    let mut f = fs::File::create(out)?;
    writeln!(f, "// Generated by build.rs from string literals under src/.")?;
    writeln!(f, "pub const GENERATED_ENV_ALLOWLIST: &[&str] = &[")?;
    for (key, files) in found {
        let sources: Vec<&str> = files.iter().map(String::as_str).collect();
        writeln!(f, "    \"{key}\", // {}", sources.join(", "))?;
    }
    writeln!(f, "];")
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let found = scan(Path::new("src"))?;
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    write_allowlist(&found, &out_dir.join("cvwatch_env_allowlist.rs"))?;

    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;
    println!(
        "cargo:rustc-env=CVWATCH_BUILD_ID={:x}-{:x}",
        now.as_secs(),
        now.subsec_nanos()
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
    Ok(())
}
