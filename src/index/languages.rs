//! Static extension-to-language table.
//!
//! Shared by file-type search (crediting repositories whose language set
//! intersects a requested extension) and by the analyzer's language
//! detection. An extension can map to more than one language.

use phf::phf_map;

static EXTENSION_LANGUAGES: phf::Map<&'static str, &'static [&'static str]> = phf_map! {
    "js" => &["JavaScript"],
    "jsx" => &["JavaScript"],
    "mjs" => &["JavaScript"],
    "cjs" => &["JavaScript"],
    "ts" => &["TypeScript"],
    "tsx" => &["TypeScript"],
    "py" => &["Python"],
    "pyi" => &["Python"],
    "rs" => &["Rust"],
    "go" => &["Go"],
    "java" => &["Java"],
    "kt" => &["Kotlin"],
    "kts" => &["Kotlin"],
    "rb" => &["Ruby"],
    "php" => &["PHP"],
    "cs" => &["C#"],
    "swift" => &["Swift"],
    "scala" => &["Scala"],
    "c" => &["C"],
    "h" => &["C", "C++"],
    "cpp" => &["C++"],
    "cc" => &["C++"],
    "cxx" => &["C++"],
    "hpp" => &["C++"],
    "sh" => &["Shell"],
    "bash" => &["Shell"],
    "html" => &["HTML"],
    "css" => &["CSS"],
    "scss" => &["CSS"],
    "sql" => &["SQL"],
};

/// Languages known to produce files with the given extension.
///
/// Accepts the extension with or without a leading dot; unknown
/// extensions yield an empty slice.
pub fn languages_for_extension(ext: &str) -> &'static [&'static str] {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    EXTENSION_LANGUAGES.get(ext.as_str()).copied().unwrap_or(&[])
}
