//! Command-line interface definitions.
//!
//! Only `clap` argument types live here; the rest of the binary consumes [`Args`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "avplay", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Engine tuning file (TOML); unset keys keep their defaults
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play a local file through the sync engine
    Play {
        /// Path to the media file
        path: PathBuf,

        /// Start position in milliseconds
        #[arg(long)]
        seek: Option<i64>,

        /// Decode and discard up to the exact seek target
        #[arg(long)]
        accurate_seek: bool,

        /// Times to play the file, 0 loops forever
        #[arg(long = "loop")]
        loop_count: Option<u32>,

        /// Playback rate (1.0 is normal speed)
        #[arg(long)]
        rate: Option<f32>,

        /// Output volume in 0.0..=1.0
        #[arg(long)]
        volume: Option<f32>,

        /// Print engine notifications as JSON lines on stdout
        #[arg(long)]
        json: bool,
    },
}
