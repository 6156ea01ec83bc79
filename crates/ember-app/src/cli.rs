//! Command-line options shared by Ember programs.
//!
//! The common flags size and place the window. Programs can register extra
//! flags of their own with [`ExtraFlag`]; anything not starting with `--` is
//! collected as a positional path.

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::runner::AppConfig;

/// Highest accepted value for `--highest_lod`.
pub const MAX_LOD: u8 = 6;

/// Command-line parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    #[error("unknown flag '{0}'")]
    UnknownFlag(String),

    #[error("flag '{0}' requires a value")]
    MissingValue(String),

    #[error("invalid value '{value}' for flag '{flag}'")]
    InvalidValue { flag: String, value: String },

    #[error("--highest_lod must be between 0 and {MAX_LOD}, got {0}")]
    LodOutOfRange(i64),
}

/// A program-specific flag accepted in addition to the common ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraFlag {
    /// Flag including the leading dashes, e.g. `--render-shader`.
    pub name: &'static str,
    pub takes_value: bool,
    pub help: &'static str,
}

impl ExtraFlag {
    pub const fn switch(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            takes_value: false,
            help,
        }
    }

    pub const fn value(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            takes_value: true,
            help,
        }
    }
}

/// Parsed command-line options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub fullscreen: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub x_pos: Option<i32>,
    pub y_pos: Option<i32>,
    /// Finest level of detail to show, `0..=6`.
    pub highest_lod: Option<u8>,
    /// Positional arguments.
    pub paths: Vec<PathBuf>,
    /// Extra switches map to an empty string.
    extras: HashMap<&'static str, String>,
}

/// Result of a successful parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Run(CliOptions),
    Help,
}

impl CliOptions {
    /// Parse `args`, which must not include the program name.
    pub fn parse_from<I, S>(args: I, extras: &[ExtraFlag]) -> Result<CliCommand, CliError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut options = Self::default();

        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            match arg {
                "-h" | "--help" => return Ok(CliCommand::Help),
                "--fullscreen" => options.fullscreen = true,
                "--width" => options.width = Some(parse_value(&args, &mut i)?),
                "--height" => options.height = Some(parse_value(&args, &mut i)?),
                "--x_pos" => options.x_pos = Some(parse_value(&args, &mut i)?),
                "--y_pos" => options.y_pos = Some(parse_value(&args, &mut i)?),
                "--highest_lod" => {
                    let lod: i64 = parse_value(&args, &mut i)?;
                    let lod = u8::try_from(lod)
                        .ok()
                        .filter(|&lod| lod <= MAX_LOD)
                        .ok_or(CliError::LodOutOfRange(lod))?;
                    options.highest_lod = Some(lod);
                }
                _ if arg.starts_with("--") => {
                    let flag = extras
                        .iter()
                        .find(|flag| flag.name == arg)
                        .ok_or_else(|| CliError::UnknownFlag(arg.to_string()))?;
                    let value = if flag.takes_value {
                        take_value(&args, &mut i)?.to_string()
                    } else {
                        String::new()
                    };
                    options.extras.insert(flag.name, value);
                }
                _ => options.paths.push(PathBuf::from(arg)),
            }
            i += 1;
        }

        Ok(CliCommand::Run(options))
    }

    /// Parse the process arguments.
    ///
    /// Prints usage and exits with status 0 for `--help`, or prints the error
    /// and usage and exits with status 1 on malformed input.
    pub fn parse_or_exit(program: &str, extras: &[ExtraFlag]) -> Self {
        match Self::parse_from(std::env::args().skip(1), extras) {
            Ok(CliCommand::Run(options)) => options,
            Ok(CliCommand::Help) => {
                eprintln!("{}", usage(program, extras));
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("error: {e}\n");
                eprintln!("{}", usage(program, extras));
                std::process::exit(1);
            }
        }
    }

    /// Whether an extra switch or value flag was given.
    pub fn has(&self, name: &str) -> bool {
        self.extras.contains_key(name)
    }

    /// Value of an extra flag that takes one.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.extras
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Window configuration with these options applied over the defaults.
    pub fn into_app_config(self, title: impl Into<String>) -> AppConfig {
        let mut config = AppConfig::new(title);
        let width = self.width.unwrap_or(config.width);
        let height = self.height.unwrap_or(config.height);
        config = config.with_size(width, height);
        if self.x_pos.is_some() || self.y_pos.is_some() {
            config = config.with_position(self.x_pos.unwrap_or(0), self.y_pos.unwrap_or(0));
        }
        config.with_fullscreen(self.fullscreen)
    }
}

fn take_value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str, CliError> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| CliError::MissingValue(flag.clone()))
}

fn parse_value<T: std::str::FromStr>(args: &[String], i: &mut usize) -> Result<T, CliError> {
    let value = take_value(args, i)?;
    value.parse().map_err(|_| CliError::InvalidValue {
        flag: args[*i - 1].clone(),
        value: value.to_string(),
    })
}

/// Usage text listing the common flags and the program's extras.
pub fn usage(program: &str, extras: &[ExtraFlag]) -> String {
    let mut text = format!(
        "USAGE:
    {program} [OPTIONS] [PATHS...]

OPTIONS:
    --fullscreen            Borderless fullscreen on the current monitor
    --width <N>             Window width in pixels
    --height <N>            Window height in pixels
    --x_pos <N>             Window x position
    --y_pos <N>             Window y position
    --highest_lod <0..{MAX_LOD}>   Finest level of detail to draw
"
    );
    for flag in extras {
        let name = if flag.takes_value {
            format!("{} <VALUE>", flag.name)
        } else {
            flag.name.to_string()
        };
        text.push_str(&format!("    {name:<24}{}\n", flag.help));
    }
    text.push_str(
        "    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)",
    );
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTRAS: &[ExtraFlag] = &[
        ExtraFlag::value("--render-shader", "render shader"),
        ExtraFlag::switch("--video-test", "video"),
    ];

    fn run(args: &[&str]) -> CliOptions {
        match CliOptions::parse_from(args.iter().copied(), EXTRAS) {
            Ok(CliCommand::Run(options)) => options,
            other => panic!("unexpected parse result: {other:?}"),
        }
    }

    fn fail(args: &[&str]) -> CliError {
        CliOptions::parse_from(args.iter().copied(), EXTRAS).unwrap_err()
    }

    #[test]
    fn common_flags() {
        let options = run(&[
            "--fullscreen",
            "--width",
            "800",
            "--height",
            "600",
            "--x_pos",
            "-10",
            "--y_pos",
            "20",
            "--highest_lod",
            "6",
        ]);

        assert!(options.fullscreen);
        assert_eq!(options.width, Some(800));
        assert_eq!(options.height, Some(600));
        assert_eq!(options.x_pos, Some(-10));
        assert_eq!(options.y_pos, Some(20));
        assert_eq!(options.highest_lod, Some(6));
    }

    #[test]
    fn no_args_is_default() {
        assert_eq!(run(&[]), CliOptions::default());
    }

    #[test]
    fn help_wins() {
        let parsed = CliOptions::parse_from(["--width", "10", "--help", "--bogus"], EXTRAS);
        assert_eq!(parsed, Ok(CliCommand::Help));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(fail(&["--bogus"]), CliError::UnknownFlag("--bogus".into()));
        assert_eq!(fail(&["--width"]), CliError::MissingValue("--width".into()));
        assert_eq!(
            fail(&["--height", "tall"]),
            CliError::InvalidValue {
                flag: "--height".into(),
                value: "tall".into(),
            }
        );
        assert_eq!(fail(&["--highest_lod", "7"]), CliError::LodOutOfRange(7));
        assert_eq!(fail(&["--highest_lod", "-1"]), CliError::LodOutOfRange(-1));
        assert_eq!(
            fail(&["--render-shader"]),
            CliError::MissingValue("--render-shader".into())
        );
    }

    #[test]
    fn extras_and_paths() {
        let options = run(&["cloud.bin", "--render-shader", "a.spv", "--video-test", "b.bin"]);

        assert_eq!(
            options.paths,
            vec![PathBuf::from("cloud.bin"), PathBuf::from("b.bin")]
        );
        assert_eq!(options.value("--render-shader"), Some("a.spv"));
        assert!(options.has("--video-test"));
        assert_eq!(options.value("--video-test"), None);
        assert!(!options.has("--resolve-shader"));
    }

    #[test]
    fn app_config_from_options() {
        let options = run(&["--width", "640", "--y_pos", "5", "--fullscreen"]);
        let config = options.into_app_config("viewer");

        assert_eq!(config.title, "viewer");
        assert_eq!(config.width, 640);
        assert_eq!(config.height, AppConfig::default().height);
        assert_eq!(config.position, Some((0, 5)));
        assert!(config.fullscreen);

        let plain = run(&[]).into_app_config("viewer");
        assert_eq!(plain.position, None);
    }

    #[test]
    fn usage_lists_extras() {
        let text = usage("ember-viewer", EXTRAS);
        assert!(text.contains("--highest_lod"));
        assert!(text.contains("--render-shader <VALUE>"));
        assert!(text.contains("--video-test"));
    }
}
