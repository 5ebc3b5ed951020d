use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP server
    Serve {
        /// Listen address, overrides the config file
        #[clap(short, long)]
        addr: Option<String>,
    },

    /// Rank catalog products by visual similarity to a local image
    Search {
        /// Query image (png, jpg, jpeg)
        image: PathBuf,

        /// Minimum similarity score [0.0, 1.0]
        #[clap(short, long)]
        threshold: Option<f32>,

        /// Return at most this many products
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Also print skipped products and their errors
        #[clap(long, default_value = "false")]
        report: bool,
    },

    /// List catalog products that take part in searches
    Products {
        /// Print the number of products only
        #[clap(short, long, default_value = "false")]
        count: bool,
    },
}
