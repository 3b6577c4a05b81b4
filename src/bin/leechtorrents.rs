//! Download finished torrents from the configured seedbox

use clap::Parser;
use seedboxtools::cli::{self, LeechArgs};

fn main() {
    let args = LeechArgs::parse();
    std::process::exit(cli::leechtorrents(args));
}
