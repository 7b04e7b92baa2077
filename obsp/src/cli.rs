// obsp/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser};

/// Installs OBS Studio and its plugins for the user running sudo.
///
/// Everything else comes from the environment: SUDO_USER, /etc/os-release,
/// and the optional OBSP_CACHE_DIR, OBSP_MANIFEST, OBSP_TOOLKIT_MAJOR and
/// OBSP_LOG variables.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about, name = "obsp", bin_name = "obsp")]
pub struct CliArgs {
    /// More output; repeat for trace level. Also logs to /var/log/obsp.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_is_counted() {
        assert_eq!(CliArgs::parse_from(["obsp"]).verbose, 0);
        assert_eq!(CliArgs::parse_from(["obsp", "-vv"]).verbose, 2);
        assert!(CliArgs::try_parse_from(["obsp", "install"]).is_err());
    }
}
