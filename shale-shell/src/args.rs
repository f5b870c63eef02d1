use clap::{builder::styling, Parser};

const SHORT_DESCRIPTION: &str = "An interactive shell and scripting language";

const LONG_DESCRIPTION: &str = r"
shale is one grammar wearing two hats: a scripting language with
functions, classes, interfaces, and exceptions, and a shell with
pipelines, redirections, and job control. Run it with no arguments for
an interactive session, or pass a script path to execute it.
";

/// Parsed command-line arguments for the shale shell.
#[derive(Parser)]
#[clap(name = "shale",
       version,
       about = SHORT_DESCRIPTION,
       long_about = LONG_DESCRIPTION,
       styles = shale_help_styles())]
pub struct CommandLineArgs {
    /// Execute the provided source text and exit.
    #[arg(short = 'c', value_name = "SOURCE")]
    pub command: Option<String>,

    /// Enable debug logging for the given tracing targets (e.g. "parse",
    /// "cmd").
    #[clap(long = "debug", value_name = "TARGET")]
    pub debug_targets: Vec<String>,

    /// Path to a script to execute.
    #[clap(allow_hyphen_values = true)]
    pub script_path: Option<String>,

    /// Arguments passed to the script.
    #[clap(allow_hyphen_values = true, num_args = 0.., trailing_var_arg = true)]
    pub script_args: Vec<String>,
}

fn shale_help_styles() -> clap::builder::Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Yellow.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Magenta.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_no_arguments() {
        let args = CommandLineArgs::parse_from(["shale"]);
        assert!(args.script_path.is_none());
        assert!(args.script_args.is_empty());
    }

    #[test]
    fn parse_script_with_args() {
        let args = CommandLineArgs::parse_from(["shale", "build.sl", "-x", "release"]);
        assert_eq!(args.script_path.as_deref(), Some("build.sl"));
        assert_eq!(args.script_args, ["-x", "release"]);
    }

    #[test]
    fn parse_inline_command() {
        let args = CommandLineArgs::parse_from(["shale", "-c", "print(1)"]);
        assert_eq!(args.command.as_deref(), Some("print(1)"));
    }
}
