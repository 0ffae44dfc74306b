//! Language hints inferred from file names.

/// Infers the runtime language from a file name, path or URL.
///
/// Query strings and fragments are ignored, so signed storage URLs work.
pub fn infer_language(name: &str) -> Option<&'static str> {
    let without_query = name.split(['?', '#']).next().unwrap_or(name);
    let file_name = without_query.rsplit(['/', '\\']).next()?;
    let (_, extension) = file_name.rsplit_once('.')?;

    let language = match extension.to_ascii_lowercase().as_str() {
        "py" => "python",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "js" | "mjs" | "cjs" => "javascript",
        "ts" => "typescript",
        "go" => "go",
        "rs" => "rust",
        "rb" => "ruby",
        "php" => "php",
        "kt" => "kotlin",
        "cs" => "csharp",
        _ => return None,
    };
    Some(language)
}
