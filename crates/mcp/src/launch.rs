//! Turning a server configuration into a process launch.

use desk_core::McpServerConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Placeholder replaced with the project directory in args, env values and cwd.
pub const PROJECT_DIR_PLACEHOLDER: &str = "${projectDir}";

/// Everything needed to start one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Complete environment of the child; nothing else is inherited.
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

/// Substitute the project directory (`.` when unknown) into the config.
pub fn interpolate(config: &McpServerConfig, project_dir: Option<&Path>) -> McpServerConfig {
    let dir = project_dir
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    let fill = |value: &str| value.replace(PROJECT_DIR_PLACEHOLDER, &dir);

    McpServerConfig {
        command: config.command.clone(),
        args: config.args.iter().map(|a| fill(a.as_str())).collect(),
        env: config.env.iter().map(|(k, v)| (k.clone(), fill(v.as_str()))).collect(),
        cwd: config.cwd.as_deref().map(fill),
    }
}

/// Configured variables plus `PATH` and `HOME` from this process when unset.
pub fn inherited_env(configured: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env = configured.clone();
    for key in ["PATH", "HOME"] {
        if !env.contains_key(key) {
            if let Ok(value) = std::env::var(key) {
                env.insert(key.to_string(), value);
            }
        }
    }
    env
}

/// Launch for an already interpolated config. The server runs in its
/// configured cwd, falling back to the project directory.
pub fn launch_command(server_name: &str, config: &McpServerConfig, project_dir: Option<&Path>) -> LaunchCommand {
    let (program, args) = platform_command(server_name, &config.command, &config.args, cfg!(windows));
    LaunchCommand {
        program,
        args,
        env: inherited_env(&config.env),
        cwd: config
            .cwd
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| project_dir.map(Path::to_path_buf)),
    }
}

/// `npx` goes through `cmd.exe` on Windows, and `docker run` gets `--init`
/// so the container handles SIGINT and SIGTERM.
fn platform_command(server_name: &str, command: &str, args: &[String], windows: bool) -> (String, Vec<String>) {
    let mut program = command.to_string();
    let mut args = args.to_vec();

    if windows && program == "npx" {
        program = "cmd.exe".to_string();
        args.splice(0..0, ["/c".to_string(), "npx".to_string()]);
    }

    if program == "docker" {
        let run_index = args
            .iter()
            .position(|a| a == "run")
            .filter(|&i| i == 0 || (i == 1 && args[0] == "container"));
        match run_index {
            Some(i) => {
                if !args.iter().any(|a| a == "--init") {
                    args.insert(i + 1, "--init".to_string());
                    debug!(server = server_name, "Added '--init' after 'run' for docker command");
                }
            }
            None => warn!(
                server = server_name,
                "Could not find 'run' subcommand at the expected position in docker args"
            ),
        }
    }

    (program, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn config(command: &str, args: &[&str]) -> McpServerConfig {
        McpServerConfig {
            command: command.to_string(),
            args: strings(args),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    #[test]
    fn test_interpolate_project_dir() {
        let mut cfg = config("node", &["${projectDir}/server.js", "--root=${projectDir}"]);
        cfg.env.insert("DATA".to_string(), "${projectDir}/.data".to_string());
        cfg.cwd = Some("${projectDir}/tools".to_string());

        let out = interpolate(&cfg, Some(Path::new("/work/app")));
        assert_eq!(out.args, strings(&["/work/app/server.js", "--root=/work/app"]));
        assert_eq!(out.env["DATA"], "/work/app/.data");
        assert_eq!(out.cwd.as_deref(), Some("/work/app/tools"));
        assert_eq!(out.command, "node");
    }

    #[test]
    fn test_interpolate_without_project_dir() {
        let out = interpolate(&config("node", &["${projectDir}/server.js"]), None);
        assert_eq!(out.args, strings(&["./server.js"]));
    }

    #[test]
    fn test_docker_run_gets_init() {
        let (_, args) = platform_command("db", "docker", &strings(&["run", "-i", "mcp/postgres"]), false);
        assert_eq!(args, strings(&["run", "--init", "-i", "mcp/postgres"]));

        let (_, args) = platform_command("db", "docker", &strings(&["container", "run", "-i", "img"]), false);
        assert_eq!(args, strings(&["container", "run", "--init", "-i", "img"]));
    }

    #[test]
    fn test_docker_init_not_duplicated() {
        let input = strings(&["run", "-i", "--init", "img"]);
        let (_, args) = platform_command("db", "docker", &input, false);
        assert_eq!(args, input);
    }

    #[test]
    fn test_docker_without_run_is_untouched() {
        let input = strings(&["compose", "run", "svc"]);
        let (_, args) = platform_command("db", "docker", &input, false);
        assert_eq!(args, input);
    }

    #[test]
    fn test_npx_on_windows() {
        let input = strings(&["-y", "@modelcontextprotocol/server-github"]);
        let (program, args) = platform_command("github", "npx", &input, true);
        assert_eq!(program, "cmd.exe");
        assert_eq!(args, strings(&["/c", "npx", "-y", "@modelcontextprotocol/server-github"]));

        let (program, args) = platform_command("github", "npx", &input, false);
        assert_eq!(program, "npx");
        assert_eq!(args, input);
    }

    #[test]
    fn test_configured_env_wins_over_inherited() {
        let mut configured = BTreeMap::new();
        configured.insert("PATH".to_string(), "/opt/bin".to_string());
        let env = inherited_env(&configured);
        assert_eq!(env["PATH"], "/opt/bin");
    }

    #[test]
    fn test_launch_cwd_falls_back_to_project() {
        let launch = launch_command("fs", &config("mcp-fs", &[]), Some(Path::new("/work/app")));
        assert_eq!(launch.cwd, Some(PathBuf::from("/work/app")));
        assert_eq!(launch.program, "mcp-fs");
    }
}
