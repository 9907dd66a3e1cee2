use std::path::Path;

/// The only places assets may live inside a project directory. Paths outside
/// these are neither uploaded nor watched.
pub const ASSET_LOCATIONS: [&str; 13] = [
    "assets",
    "config",
    "content",
    "frame",
    "layout",
    "locales",
    "pages",
    "pages/customers",
    "blocks",
    "sections",
    "snippets",
    "templates",
    "templates/customers",
];

/// Normalize a path to forward slashes with no trailing separator.
fn normalize(path: &str) -> String {
    let cleaned = path.replace('\\', "/");
    cleaned.trim_end_matches('/').to_string()
}

fn relative_to_root(root: &str, filename: &str) -> String {
    let root = normalize(root);
    let filename = normalize(filename);
    match filename.strip_prefix(&format!("{}/", root)) {
        Some(rel) => rel.to_string(),
        None => filename,
    }
}

/// Returns true when the path names a file under a recognized project
/// subdirectory, or one of the subdirectories themselves.
pub fn path_in_project(root: &str, filename: &str) -> bool {
    !path_to_project(root, filename).is_empty() || is_project_directory(root, filename)
}

/// Returns true when the path names one of the recognized project
/// subdirectories exactly.
pub fn is_project_directory(root: &str, filename: &str) -> bool {
    let rel = relative_to_root(root, filename);
    ASSET_LOCATIONS.iter().any(|dir| *dir == rel)
}

/// Convert a path (absolute or project-relative) into its project-relative
/// asset key, e.g. `/project/assets/app.js` becomes `assets/app.js`. Returns
/// an empty string when the path does not lie under a recognized project
/// subdirectory.
pub fn path_to_project(root: &str, filename: &str) -> String {
    let rel = relative_to_root(root, filename);

    for dir in ASSET_LOCATIONS {
        let prefix = format!("{}/", dir);
        if let Some(rest) = rel.strip_prefix(&prefix) {
            if !rest.is_empty() {
                return format!("{}{}", prefix, rest);
            }
        }
    }

    String::new()
}

/// Project-relative asset key for an absolute path, as a convenience for
/// callers holding `Path`s.
pub fn to_project_key(root: &Path, full_path: &Path) -> String {
    path_to_project(&root.to_string_lossy(), &full_path.to_string_lossy())
}
