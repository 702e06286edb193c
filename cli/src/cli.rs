use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[clap(name = "buildfox", version, author)]
pub struct Args {
    /// The fox manifest to generate from
    #[clap(default_value = "build.fox")]
    pub input: PathBuf,

    /// Output ninja file; `-` writes to stdout
    #[clap(short, long, default_value = "build.ninja", value_name = "FILE")]
    pub output: String,

    /// Set a variable before loading any manifest
    #[clap(short = 'D', long = "define", value_name = "NAME=VALUE")]
    pub defines: Vec<String>,

    /// Don't load the bundled core definitions
    #[clap(long)]
    pub no_core: bool,

    /// Show debug output while generating
    #[clap(short, long)]
    pub verbose: bool,
}
