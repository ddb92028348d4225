use clap::{Args, Parser};
use std::path::PathBuf;

#[derive(Args, Debug, Clone, Default)]
pub struct ProjectConfigOpts {
    #[arg(
        long,
        help = "Specify the target project directory (default: current dir).",
        help_heading = "Project Setup",
        value_name = "PATH"
    )]
    pub project_root: Option<PathBuf>,

    #[arg(
        long,
        help = "Specify path/filename of the TOML config file (default: .xtools/xask/xask.toml).",
        value_name = "CONFIG_FILE",
        conflicts_with = "disable_config_file",
        help_heading = "Project Setup"
    )]
    pub config_file: Option<String>,

    #[arg(
        long,
        help = "Disable loading any TOML config file.",
        conflicts_with = "config_file",
        help_heading = "Project Setup"
    )]
    pub disable_config_file: bool,

    #[arg(
        long,
        help = "Read the request from this file instead of prompt.md / query.md.",
        value_name = "FILE",
        help_heading = "Project Setup"
    )]
    pub request: Option<PathBuf>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SessionOpts {
    #[arg(
        long,
        help = "Enable extended thinking and show the reasoning stream.",
        help_heading = "Session"
    )]
    pub think: bool,

    #[arg(
        long,
        help = "Write the final answer to the output file (default: response.md).",
        help_heading = "Session"
    )]
    pub out: bool,

    #[arg(
        short = 'y',
        long,
        help = "Skip the confirmation prompt.",
        help_heading = "Session"
    )]
    pub yes: bool,

    #[arg(
        long,
        help = "Stop after the summary; do not call the API.",
        conflicts_with = "yes",
        help_heading = "Session"
    )]
    pub dry_run: bool,

    #[arg(
        long,
        help = "Ask the API for an exact input token count before sending.",
        help_heading = "Session"
    )]
    pub count: bool,

    #[arg(
        long,
        help = "Override the model name from the config file.",
        value_name = "NAME",
        help_heading = "Session"
    )]
    pub model: Option<String>,
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Ask an LLM about your repository.",
    long_about = "xask reads a request document (prompt.md or query.md) whose front matter lists \nthe files to include, sends the project tree and those files to the Anthropic API, \nand streams the answer back with a token and cost report.",
    help_template = "{about-section}\nUsage: {usage}\n\n{all-args}{after-help}",
    after_help = "EXAMPLES:\n  xask\n  xask --think --out\n  xask --dry-run -v\n  xask -y --request docs/question.md"
)]
pub struct Cli {
    #[command(flatten)]
    pub project_config: ProjectConfigOpts,

    #[command(flatten)]
    pub session: SessionOpts,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Increase message verbosity (-v, -vv, -vvv).")]
    pub verbose: u8,

    #[arg(short, long, help = "Silence informational messages and warnings.")]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_session_flags() {
        let cli = Cli::parse_from(["xask", "--think", "--out", "-y", "--model", "m", "-vv"]);
        assert!(cli.session.think);
        assert!(cli.session.out);
        assert!(cli.session.yes);
        assert_eq!(cli.session.model.as_deref(), Some("m"));
        assert_eq!(cli.verbose, 2);
        assert!(!cli.session.dry_run);
    }

    #[test]
    fn config_file_conflicts_with_disable() {
        let result =
            Cli::try_parse_from(["xask", "--config-file", "x", "--disable-config-file"]);
        assert!(result.is_err());
    }
}
