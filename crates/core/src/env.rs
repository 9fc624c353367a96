use std::collections::HashMap;
use std::env;
use std::path::Path;

use tracing::debug;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

pub fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Environment for provider clients: the process env, overlaid by `~/.env`
/// and then by `<project_dir>/.env`.
pub fn load_llm_env(project_dir: &Path) -> HashMap<String, String> {
    let mut vars: HashMap<String, String> = env::vars().collect();

    if let Some(home) = dirs::home_dir() {
        merge_env_file(&mut vars, &home.join(".env"));
    }
    merge_env_file(&mut vars, &project_dir.join(".env"));

    vars
}

fn merge_env_file(vars: &mut HashMap<String, String>, path: &Path) {
    let Ok(iter) = dotenvy::from_path_iter(path) else {
        return;
    };
    let mut count = 0usize;
    for (key, value) in iter.flatten() {
        vars.insert(key, value);
        count += 1;
    }
    debug!(path = %path.display(), count, "Merged env file");
}
